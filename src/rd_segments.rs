//! Conversion of segmentation index ranges into genomic read-depth segments
//!

use log::warn;
use serde::Serialize;

use crate::segmentation::SegmentRange;

/// A genomic interval of approximately constant read depth
///
/// `begin` and `end` are 1-based and inclusive
///
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RdSegment {
    pub chrom_index: usize,
    pub begin: u64,
    pub end: u64,

    /// Number of depth bins in the segment
    pub bin_count: usize,

    /// Marker count reported by the segmentation backend, if it reports one
    pub mark_count: Option<usize>,

    pub mean_depth: f64,
}

/// Translate segment index ranges over a chromosome depth track into genomic segments
///
/// Each segment mean is taken from the depth values of its index range. Coordinates come from
/// the bin positions of the first and last bin in the range, so that segments separated by
/// excluded bins do not overlap. The end of the final bin is clamped to `chrom_size`.
///
pub fn get_chrom_rd_segments(
    chrom_index: usize,
    segment_ranges: &[SegmentRange],
    depths: &[f64],
    positions: &[usize],
    bin_size: u32,
    chrom_size: u64,
) -> Vec<RdSegment> {
    assert_eq!(depths.len(), positions.len());

    let bin_count = depths.len();
    let bin_size = bin_size as u64;
    let mut segments = Vec::with_capacity(segment_ranges.len());
    for segment_range in segment_ranges.iter() {
        let range = &segment_range.range;
        let end_index = std::cmp::min(range.end, bin_count);
        if range.start >= end_index {
            continue;
        }

        let segment_depths = &depths[range.start..end_index];
        let mean_depth = segment_depths.iter().sum::<f64>() / segment_depths.len() as f64;

        let begin = positions[range.start] as u64 * bin_size + 1;
        let end = std::cmp::min(positions[end_index - 1] as u64 * bin_size + bin_size, chrom_size);
        segments.push(RdSegment {
            chrom_index,
            begin,
            end,
            bin_count: segment_depths.len(),
            mark_count: segment_range.mark_count,
            mean_depth,
        });
    }
    segments
}

/// Location of a segment mean which could not be repaired
#[derive(Debug)]
pub struct UnrepairedSegment {
    pub segment_index: usize,
    pub begin: u64,
    pub end: u64,
}

/// Replace undefined (NaN) segment means with the average of the neighboring segment means
///
/// Segments are expected to be from a single chromosome, so repair never blends values across
/// chromosomes. A segment without a defined mean on both sides is reported back as an error.
///
/// Returns the number of repaired segments
///
pub fn repair_undefined_segment_means(
    segments: &mut [RdSegment],
) -> Result<usize, UnrepairedSegment> {
    let mut repair_count = 0;
    for segment_index in 0..segments.len() {
        if !segments[segment_index].mean_depth.is_nan() {
            continue;
        }

        let prev_mean = segment_index
            .checked_sub(1)
            .map(|x| segments[x].mean_depth)
            .filter(|x| !x.is_nan());
        let next_mean = segments
            .get(segment_index + 1)
            .map(|x| x.mean_depth)
            .filter(|x| !x.is_nan());

        let segment = &mut segments[segment_index];
        match (prev_mean, next_mean) {
            (Some(prev_mean), Some(next_mean)) => {
                segment.mean_depth = (prev_mean + next_mean) / 2.0;
                repair_count += 1;
            }
            _ => {
                return Err(UnrepairedSegment {
                    segment_index,
                    begin: segment.begin,
                    end: segment.end,
                });
            }
        }
    }

    if repair_count > 0 {
        warn!("Repaired {repair_count} undefined segment depth values from neighboring segments");
    }
    Ok(repair_count)
}
