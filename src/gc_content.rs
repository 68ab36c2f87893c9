//! GC content annotation of depth bins
//!

/// GC content of one depth bin
///
/// GC fraction is stored on an integer per-mille scale so that bins can be grouped by exact
/// equality during GC bias correction.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinGcContent {
    /// The bin's reference window contains at least one ambiguous base
    Ambiguous,
    GcPermille(u16),
}

/// Convert a GC base count into a per-mille GC level
///
/// The fraction is taken over the full bin size, even for a truncated final bin, and rounded to 3
/// decimal places.
///
pub fn gc_count_to_permille(gc_count: usize, bin_size: u32) -> u16 {
    let gc_frac = gc_count as f64 / bin_size as f64;
    (gc_frac * 1000.0).round().clamp(0.0, 1000.0) as u16
}

/// Annotate a single reference window
///
pub fn get_window_gc_content(window: &[u8], bin_size: u32) -> BinGcContent {
    let mut gc_count = 0;
    for base in window.iter() {
        match base {
            b'N' | b'n' => {
                return BinGcContent::Ambiguous;
            }
            b'G' | b'C' | b'g' | b'c' => {
                gc_count += 1;
            }
            _ => {}
        }
    }
    BinGcContent::GcPermille(gc_count_to_permille(gc_count, bin_size))
}

/// Return GC content for each of the `bin_count` bins of a chromosome reference sequence
///
/// Bin `i` covers the reference window `[i*bin_size, (i+1)*bin_size)`, truncated at the end of the
/// chromosome.
///
pub fn get_chrom_gc_content(chrom_ref: &[u8], bin_size: u32, bin_count: usize) -> Vec<BinGcContent> {
    let bin_size_usize = bin_size as usize;
    (0..bin_count)
        .map(|bin_index| {
            let start = std::cmp::min(bin_index * bin_size_usize, chrom_ref.len());
            let end = std::cmp::min(start + bin_size_usize, chrom_ref.len());
            get_window_gc_content(&chrom_ref[start..end], bin_size)
        })
        .collect()
}
