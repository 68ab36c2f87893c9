//! Change-point segmentation of depth tracks
//!
//! Two interchangeable strategies are provided. Both produce index ranges which tile the depth
//! array exactly, in order, with no zero-width entries.
//!

mod cbs;
mod external;

use std::ops::Range;

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::cbs::{ArcSignificance, CbsSegmenter, CbsSettings};
pub use self::external::{ExternalSegmenter, ExternalSegmenterSettings};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SegmentationStrategy {
    /// In-process circular binary segmentation
    #[default]
    Native,

    /// Circular binary segmentation by an external DNAcopy process
    External,
}

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to launch external segmentation command '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external segmentation command timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("external segmentation command failed with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("malformed segmentation output line {line_number} in '{path}': '{line}'")]
    MalformedOutput {
        path: String,
        line_number: usize,
        line: String,
    },
}

/// One segment of a depth track, as an index range into the track
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRange {
    pub range: Range<usize>,

    /// Number of markers assigned to the segment by a segmentation backend that reports them
    pub mark_count: Option<usize>,
}

impl From<Range<usize>> for SegmentRange {
    fn from(range: Range<usize>) -> Self {
        Self {
            range,
            mark_count: None,
        }
    }
}

/// Partition a depth array into contiguous index ranges of approximately constant depth
///
pub trait Segmenter: Sync {
    /// Returns segments whose index ranges tile `[0, depths.len())`
    ///
    /// `chrom_label` is only used to name working files and log messages.
    ///
    fn segment(
        &self,
        chrom_label: &str,
        depths: &[f64],
    ) -> Result<Vec<SegmentRange>, SegmentationError>;
}

fn add_mark_counts(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Repair raw segments so that their ranges exactly tile `[0, bin_count)`
///
/// Segments are sorted and clamped to the array. Zero-width and fully overlapped segments are
/// merged into the preceding segment, with any mark count added to it. Gaps are closed by extending
/// the preceding segment, and the first and last segments are stretched to the array edges.
///
pub fn normalize_segment_ranges(
    mut segments: Vec<SegmentRange>,
    bin_count: usize,
) -> Vec<SegmentRange> {
    if bin_count == 0 {
        return Vec::new();
    }

    segments.sort_by_key(|x| (x.range.start, x.range.end));

    let mut merged_count = 0;
    let mut normalized: Vec<SegmentRange> = Vec::with_capacity(segments.len());
    for segment in segments.into_iter() {
        let start = std::cmp::min(segment.range.start, bin_count);
        let end = std::cmp::min(segment.range.end, bin_count);
        match normalized.last_mut() {
            None => {
                if end == 0 {
                    merged_count += 1;
                    continue;
                }
                normalized.push(SegmentRange {
                    range: 0..end,
                    mark_count: segment.mark_count,
                });
            }
            Some(last) => {
                let start = std::cmp::max(start, last.range.end);
                if end <= start {
                    last.mark_count = add_mark_counts(last.mark_count, segment.mark_count);
                    merged_count += 1;
                    continue;
                }
                // Close any gap by extending the preceding range
                last.range.end = start;
                normalized.push(SegmentRange {
                    range: start..end,
                    mark_count: segment.mark_count,
                });
            }
        }
    }

    match normalized.last_mut() {
        Some(last) => {
            last.range.end = bin_count;
        }
        None => {
            normalized.push(SegmentRange::from(0..bin_count));
        }
    }

    if merged_count > 0 {
        debug!("Merged {merged_count} degenerate segment ranges");
    }

    normalized
}

/// Test helper shared by all segmentation strategies
#[cfg(test)]
pub fn get_ranges(segments: &[SegmentRange]) -> Vec<Range<usize>> {
    segments.iter().map(|x| x.range.clone()).collect()
}

/// Test helper shared by all segmentation strategies
#[cfg(test)]
pub fn assert_ranges_tile(segments: &[SegmentRange], bin_count: usize) {
    if bin_count == 0 {
        assert!(segments.is_empty());
        return;
    }
    let ranges = get_ranges(segments);
    assert_eq!(ranges.first().unwrap().start, 0);
    assert_eq!(ranges.last().unwrap().end, bin_count);
    for range in ranges.iter() {
        assert!(range.start < range.end, "Zero width range {range:?}");
    }
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}
