use std::collections::BTreeMap;

use log::{debug, warn};
use thousands::Separable;

use crate::chrom_list::ChromList;
use crate::gc_content::BinGcContent;

/// Return the number of bins of size `bin_size` needed to cover `total_size`
///
/// Any incomplete bin at the end of the chromosome is included
///
pub fn get_bin_count(total_size: u64, bin_size: u32) -> usize {
    total_size.div_ceil(bin_size as u64) as usize
}

/// Return the zero-indexed bin number of position `pos` given bins of size `bin_size`
///
pub fn get_bin_index(pos: u64, bin_size: u32) -> usize {
    (pos / bin_size as u64) as usize
}

/// The leftmost mapped position of one alignment record
#[derive(Clone, Copy, Debug)]
pub struct AlignmentPosition {
    pub chrom_index: usize,

    /// Zero-indexed reference position
    pub pos: i64,
}

/// Raw read counts for each bin of one chromosome
#[derive(Clone, Debug)]
pub struct ChromReadCounts {
    pub counts: Vec<u32>,

    /// Number of reads with a position outside of the chromosome's bin range, which were clamped
    /// into the first or last bin
    pub clamped_read_count: u64,
}

impl ChromReadCounts {
    fn new(bin_count: usize) -> Self {
        Self {
            counts: vec![0; bin_count],
            clamped_read_count: 0,
        }
    }

    pub fn total_read_count(&self) -> u64 {
        self.counts.iter().map(|&x| x as u64).sum()
    }
}

/// Read counts for every chromosome observed in the alignment source, keyed on chromosome index
///
#[derive(Debug)]
pub struct GenomeReadCounts {
    pub bin_size: u32,
    pub chroms: BTreeMap<usize, ChromReadCounts>,
}

/// Accumulate alignment positions into per-chromosome read count bins
///
/// Arrays are only created for chromosomes that appear in the alignment stream, so chromosomes which
/// are never referenced are absent from all downstream stages.
///
pub struct ReadCountBinner<'a> {
    chrom_list: &'a ChromList,
    bin_size: u32,
    chroms: BTreeMap<usize, ChromReadCounts>,
}

impl<'a> ReadCountBinner<'a> {
    pub fn new(chrom_list: &'a ChromList, bin_size: u32) -> Self {
        assert!(bin_size > 0);
        Self {
            chrom_list,
            bin_size,
            chroms: BTreeMap::new(),
        }
    }

    pub fn add_position(&mut self, position: AlignmentPosition) {
        let chrom_info = &self.chrom_list.data[position.chrom_index];
        let bin_size = self.bin_size;
        let chrom_counts = self
            .chroms
            .entry(position.chrom_index)
            .or_insert_with(|| {
                // Keep at least one bin so that a zero-length header entry can still take clamped reads
                let bin_count = std::cmp::max(get_bin_count(chrom_info.length, bin_size), 1);
                ChromReadCounts::new(bin_count)
            });

        let max_bin_index = chrom_counts.counts.len() - 1;
        let bin_index = if position.pos < 0 {
            None
        } else {
            Some(get_bin_index(position.pos as u64, bin_size)).filter(|&x| x <= max_bin_index)
        };
        let bin_index = match bin_index {
            Some(x) => x,
            None => {
                debug!(
                    "Clamping read at {}:{} outside of chromosome bin range",
                    chrom_info.label, position.pos
                );
                chrom_counts.clamped_read_count += 1;
                if position.pos < 0 { 0 } else { max_bin_index }
            }
        };
        chrom_counts.counts[bin_index] += 1;
    }

    /// Discard the counts of chromosome `chrom_index` and all later chromosomes
    ///
    /// Returns the number of chromosomes discarded.
    ///
    pub fn drop_chroms_from(&mut self, chrom_index: usize) -> usize {
        self.chroms.split_off(&chrom_index).len()
    }

    pub fn complete_processing(self) -> GenomeReadCounts {
        for (&chrom_index, chrom_counts) in self.chroms.iter() {
            if chrom_counts.clamped_read_count > 0 {
                warn!(
                    "Clamped {} reads outside of the bin range of chromosome '{}'",
                    chrom_counts.clamped_read_count.separate_with_commas(),
                    self.chrom_list.data[chrom_index].label
                );
            }
        }
        GenomeReadCounts {
            bin_size: self.bin_size,
            chroms: self.chroms,
        }
    }
}

/// Bin read counts from an infallible stream of alignment positions
///
#[cfg(test)]
pub fn get_genome_read_counts(
    chrom_list: &ChromList,
    bin_size: u32,
    positions: impl IntoIterator<Item = AlignmentPosition>,
) -> GenomeReadCounts {
    let mut binner = ReadCountBinner::new(chrom_list, bin_size);
    for position in positions {
        binner.add_position(position);
    }
    binner.complete_processing()
}

#[derive(Clone, Debug, PartialEq)]
pub enum DepthBin {
    Excluded,
    Depth(f64),
}

pub type ChromDepthBins = Vec<DepthBin>;

/// Convert raw read counts into depth bins, in reads per base
///
/// Bins with ambiguous reference sequence are marked excluded.
///
pub fn get_chrom_depth_bins(
    read_counts: &ChromReadCounts,
    gc_bins: &[BinGcContent],
    bin_size: u32,
) -> ChromDepthBins {
    assert_eq!(read_counts.counts.len(), gc_bins.len());
    read_counts
        .counts
        .iter()
        .zip(gc_bins.iter())
        .map(|(&count, gc_bin)| match gc_bin {
            BinGcContent::Ambiguous => DepthBin::Excluded,
            BinGcContent::GcPermille(_) => DepthBin::Depth(count as f64 / bin_size as f64),
        })
        .collect()
}

/// Valid bins of one chromosome, as parallel depth, gc-level and position arrays
///
/// All three arrays have the same length, and `positions` holds the original bin index of each
/// entry in strictly ascending order.
///
#[derive(Clone, Debug, Default)]
pub struct ChromDepthTrack {
    pub depths: Vec<f64>,
    pub gc_levels: Vec<u16>,
    pub positions: Vec<usize>,
}

impl ChromDepthTrack {
    /// Filter out excluded bins in a single pass over depth and gc bins
    ///
    pub fn from_bins(depth_bins: &[DepthBin], gc_bins: &[BinGcContent]) -> Self {
        assert_eq!(depth_bins.len(), gc_bins.len());
        let mut track = Self::default();
        for (bin_index, (depth_bin, gc_bin)) in depth_bins.iter().zip(gc_bins.iter()).enumerate() {
            if let (DepthBin::Depth(depth), BinGcContent::GcPermille(gc)) = (depth_bin, gc_bin) {
                track.depths.push(*depth);
                track.gc_levels.push(*gc);
                track.positions.push(bin_index);
            }
        }
        track
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Replace every zero depth with `fill_depth`
    ///
    /// Returns the number of bins filled
    ///
    pub fn fill_zero_depths(&mut self, fill_depth: f64) -> usize {
        let mut fill_count = 0;
        for depth in self.depths.iter_mut().filter(|x| **x == 0.0) {
            *depth = fill_depth;
            fill_count += 1;
        }
        fill_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_chrom_list() -> ChromList {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 2500);
        chrom_list.add_chrom("chr2", 1000);
        chrom_list.add_chrom("chr3", 1000);
        chrom_list
    }

    #[test]
    fn test_get_bin_count() {
        assert_eq!(get_bin_count(2500, 1000), 3);
        assert_eq!(get_bin_count(2000, 1000), 2);
        assert_eq!(get_bin_count(0, 1000), 0);
    }

    #[test]
    fn test_get_genome_read_counts() {
        let chrom_list = get_test_chrom_list();
        let positions = [(0, 0), (0, 999), (0, 1000), (0, 2499), (2, 10)]
            .into_iter()
            .map(|(chrom_index, pos)| AlignmentPosition { chrom_index, pos });

        let read_counts = get_genome_read_counts(&chrom_list, 1000, positions);

        assert_eq!(read_counts.bin_size, 1000);

        // chr2 is never referenced so it should be dropped
        assert_eq!(read_counts.chroms.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(read_counts.chroms[&0].counts, vec![2, 1, 1]);
        assert_eq!(read_counts.chroms[&2].counts, vec![1]);
        assert_eq!(read_counts.chroms[&0].total_read_count(), 4);
    }

    #[test]
    fn test_drop_chroms_from() {
        let chrom_list = get_test_chrom_list();
        let mut binner = ReadCountBinner::new(&chrom_list, 1000);
        for chrom_index in [0, 1, 2] {
            binner.add_position(AlignmentPosition { chrom_index, pos: 10 });
        }

        assert_eq!(binner.drop_chroms_from(1), 2);
        let read_counts = binner.complete_processing();
        assert_eq!(read_counts.chroms.keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_out_of_range_positions_are_clamped() {
        let chrom_list = get_test_chrom_list();
        let positions = [(1, 1500), (1, -4), (1, 999)]
            .into_iter()
            .map(|(chrom_index, pos)| AlignmentPosition { chrom_index, pos });

        let read_counts = get_genome_read_counts(&chrom_list, 500, positions);
        let chrom_counts = &read_counts.chroms[&1];
        assert_eq!(chrom_counts.counts, vec![1, 2]);
        assert_eq!(chrom_counts.clamped_read_count, 2);
    }

    #[test]
    fn test_chrom_depth_track() {
        let read_counts = ChromReadCounts {
            counts: vec![10, 0, 30, 40],
            clamped_read_count: 0,
        };
        let gc_bins = vec![
            BinGcContent::GcPermille(400),
            BinGcContent::GcPermille(410),
            BinGcContent::Ambiguous,
            BinGcContent::GcPermille(420),
        ];

        let depth_bins = get_chrom_depth_bins(&read_counts, &gc_bins, 10);
        assert_eq!(depth_bins[2], DepthBin::Excluded);
        assert_eq!(depth_bins[3], DepthBin::Depth(4.0));

        let mut track = ChromDepthTrack::from_bins(&depth_bins, &gc_bins);
        assert_eq!(track.len(), 3);
        assert_eq!(track.depths.len(), track.positions.len());
        assert_eq!(track.gc_levels.len(), track.positions.len());
        assert_eq!(track.positions, vec![0, 1, 3]);
        assert!(track.positions.windows(2).all(|x| x[0] < x[1]));
        assert_eq!(track.gc_levels, vec![400, 410, 420]);

        assert_eq!(track.fill_zero_depths(2.5), 1);
        assert_eq!(track.depths, vec![1.0, 2.5, 4.0]);
    }
}
