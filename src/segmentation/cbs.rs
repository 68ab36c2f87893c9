//! In-process circular binary segmentation
//!

use std::ops::Range;

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{SegmentRange, SegmentationError, Segmenter, normalize_segment_ranges};

/// Method used to decide whether the maximal arc of an interval is a real change in depth
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ArcSignificance {
    /// Two-sample t-test of the arc against the rest of the interval, Bonferroni adjusted for the
    /// number of bins in the interval
    StudentT,

    /// Compare the arc statistic to the maximal arc statistics of shuffled copies of the interval
    Permutation { shuffles: usize, seed: u64 },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CbsSettings {
    /// Significance level for accepting a change-point
    pub alpha: f64,

    /// Minimum number of bins in a segment created by a new change-point
    pub min_segment_bins: usize,

    pub significance: ArcSignificance,
}

impl Default for CbsSettings {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            min_segment_bins: 2,
            significance: ArcSignificance::StudentT,
        }
    }
}

/// An arc `[start, end)` of an interval, with the CBS statistic for that arc
#[derive(Debug, PartialEq)]
struct Arc {
    start: usize,
    end: usize,
    stat: f64,
}

/// Find the arc of `x` with the maximal CBS statistic
///
/// The arc is found from the extreme values of the mean-centered prefix sums, where prefix sum `i`
/// covers `x[..i]`. Returns None if no arc separates the interval, such as for constant input.
///
fn find_max_arc(x: &[f64]) -> Option<Arc> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let mean = x.iter().sum::<f64>() / n as f64;

    let mut prefix_sum = 0.0;
    let (mut min_sum, mut min_pos) = (0.0, 0);
    let (mut max_sum, mut max_pos) = (0.0, 0);
    for (i, v) in x.iter().enumerate() {
        prefix_sum += v - mean;
        if prefix_sum < min_sum {
            min_sum = prefix_sum;
            min_pos = i + 1;
        }
        if prefix_sum > max_sum {
            max_sum = prefix_sum;
            max_pos = i + 1;
        }
    }

    let start = std::cmp::min(min_pos, max_pos);
    let end = std::cmp::max(min_pos, max_pos);
    let width = end - start;
    if width == 0 || width == n {
        return None;
    }

    let arc_sum = max_sum - min_sum;
    let stat = arc_sum * arc_sum * n as f64 / (width as f64 * (n - width) as f64);
    Some(Arc { start, end, stat })
}

/// Two-sample t-test of `x[start..end]` against the remainder of `x`, using pooled variance
///
fn is_arc_significant_t_test(x: &[f64], start: usize, end: usize, alpha: f64) -> bool {
    let n = x.len();
    if n < 3 {
        return false;
    }

    let inside = &x[start..end];
    let outside = || x[..start].iter().chain(x[end..].iter());
    let n_in = inside.len() as f64;
    let n_out = (n - inside.len()) as f64;

    let mean_in = inside.iter().sum::<f64>() / n_in;
    let mean_out = outside().sum::<f64>() / n_out;
    let diff = mean_in - mean_out;
    if diff == 0.0 {
        return false;
    }

    let ss_in = inside.iter().map(|v| (v - mean_in).powi(2)).sum::<f64>();
    let ss_out = outside().map(|v| (v - mean_out).powi(2)).sum::<f64>();
    let pooled_var = (ss_in + ss_out) / (n - 2) as f64;
    let std_err = (pooled_var * (1.0 / n_in + 1.0 / n_out)).sqrt();
    if std_err == 0.0 {
        return true;
    }

    let dist = match StudentsT::new(0.0, 1.0, (n - 2) as f64) {
        Ok(x) => x,
        Err(_) => return false,
    };
    let t = diff / std_err;
    let pvalue = 2.0 * dist.sf(t.abs());
    pvalue * (n as f64) < alpha
}

/// Permutation test of the observed maximal arc statistic
///
/// Testing stops early once the number of shuffles reaching the observed statistic shows that the
/// arc can't be significant.
///
fn is_arc_significant_permutation(
    x: &[f64],
    observed_stat: f64,
    alpha: f64,
    shuffles: usize,
    rng: &mut StdRng,
) -> bool {
    let max_exceed_count = alpha * shuffles as f64;
    let mut exceed_count = 0;
    let mut shuffled = x.to_vec();
    for _ in 0..shuffles {
        shuffled.shuffle(rng);
        let stat = find_max_arc(&shuffled).map_or(0.0, |x| x.stat);
        if stat >= observed_stat {
            exceed_count += 1;
            if exceed_count as f64 > max_exceed_count {
                return false;
            }
        }
    }
    true
}

pub struct CbsSegmenter {
    settings: CbsSettings,
}

impl CbsSegmenter {
    pub fn new(settings: CbsSettings) -> Self {
        assert!(settings.min_segment_bins > 0);
        assert!(settings.alpha > 0.0 && settings.alpha < 1.0);
        Self { settings }
    }

    /// Find a significant split of `x` into up to three parts
    ///
    /// Returns the `[start, end)` arc bounds within `x`, where either bound may coincide with an
    /// edge of `x`.
    ///
    /// * `offset` - position of `x` in the full depth array, used to seed the permutation test
    ///
    fn find_split(&self, x: &[f64], offset: usize) -> Option<(usize, usize)> {
        let n = x.len();
        let min_bins = self.settings.min_segment_bins;

        let arc = find_max_arc(x)?;

        // Snap arc ends close to the interval edges onto the edges
        let start = if arc.start < min_bins { 0 } else { arc.start };
        let end = if n - arc.end < min_bins { n } else { arc.end };
        if (start == 0 && end == n) || (end - start) < min_bins {
            return None;
        }

        let is_significant = match &self.settings.significance {
            ArcSignificance::StudentT => {
                is_arc_significant_t_test(x, start, end, self.settings.alpha)
            }
            ArcSignificance::Permutation { shuffles, seed } => {
                let interval_seed = seed ^ ((offset as u64) << 32) ^ (n as u64);
                let mut rng = StdRng::seed_from_u64(interval_seed);
                is_arc_significant_permutation(x, arc.stat, self.settings.alpha, *shuffles, &mut rng)
            }
        };

        if is_significant { Some((start, end)) } else { None }
    }

    /// Segment the full depth array
    ///
    /// Intervals are split iteratively from a work stack until no significant arc remains in any of
    /// them.
    ///
    fn segment_ranges(&self, depths: &[f64]) -> Vec<Range<usize>> {
        if depths.is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut stack = vec![0..depths.len()];
        while let Some(interval) = stack.pop() {
            match self.find_split(&depths[interval.clone()], interval.start) {
                Some((start, end)) => {
                    let start = interval.start + start;
                    let end = interval.start + end;
                    for part in [interval.start..start, start..end, end..interval.end] {
                        if !part.is_empty() {
                            stack.push(part);
                        }
                    }
                }
                None => {
                    segments.push(interval);
                }
            }
        }

        segments.sort_by_key(|x| x.start);
        segments
    }
}

impl Segmenter for CbsSegmenter {
    fn segment(
        &self,
        chrom_label: &str,
        depths: &[f64],
    ) -> Result<Vec<SegmentRange>, SegmentationError> {
        let segments = self
            .segment_ranges(depths)
            .into_iter()
            .map(SegmentRange::from)
            .collect::<Vec<_>>();
        debug!(
            "CBS found {} segments in {} bins of chromosome '{chrom_label}'",
            segments.len(),
            depths.len()
        );
        Ok(normalize_segment_ranges(segments, depths.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{assert_ranges_tile, get_ranges};

    /// Deterministic low-amplitude noise
    fn noise(i: usize) -> f64 {
        0.01 * (((i * 7) % 5) as f64 - 2.0)
    }

    fn get_step_depths(levels: &[(usize, f64)]) -> Vec<f64> {
        let mut depths = Vec::new();
        for &(count, level) in levels.iter() {
            for _ in 0..count {
                let i = depths.len();
                depths.push(level + noise(i));
            }
        }
        depths
    }

    #[test]
    fn test_find_max_arc() {
        let x = [1.0, 1.0, 5.0, 5.0, 5.0, 1.0, 1.0, 1.0];
        let arc = find_max_arc(&x).unwrap();
        assert_eq!((arc.start, arc.end), (2, 5));

        assert_eq!(find_max_arc(&[2.0; 10]), None);
        assert_eq!(find_max_arc(&[2.0]), None);
    }

    #[test]
    fn test_two_level_segmentation() {
        let depths = [5.0, 5.0, 5.0, 5.0, 50.0, 50.0, 50.0, 50.0];
        let segmenter = CbsSegmenter::new(CbsSettings::default());
        let segments = segmenter.segment("chr1", &depths).unwrap();
        assert_eq!(get_ranges(&segments), vec![0..4, 4..8]);
        assert!(segments.iter().all(|x| x.mark_count.is_none()));
    }

    #[test]
    fn test_constant_depth_is_one_segment() {
        let depths = vec![0.1; 100];
        let segmenter = CbsSegmenter::new(CbsSettings::default());
        let segments = segmenter.segment("chr1", &depths).unwrap();
        assert_eq!(get_ranges(&segments), vec![0..100]);
    }

    #[test]
    fn test_empty_depth() {
        let segmenter = CbsSegmenter::new(CbsSettings::default());
        let segments = segmenter.segment("chr1", &[]).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_interior_arc_segmentation() {
        let depths = get_step_depths(&[(60, 1.0), (30, 2.0), (60, 1.0)]);
        let segmenter = CbsSegmenter::new(CbsSettings::default());
        let segments = segmenter.segment("chr1", &depths).unwrap();
        assert_ranges_tile(&segments, depths.len());
        let ranges = get_ranges(&segments);
        assert!(ranges.iter().any(|x| x.start == 60));
        assert!(ranges.iter().any(|x| x.start == 90));
        for range in ranges.iter() {
            let in_gain = range.start >= 60 && range.end <= 90;
            let in_baseline = range.end <= 60 || range.start >= 90;
            assert!(in_gain || in_baseline, "Segment {range:?} spans a change-point");
        }
    }

    #[test]
    fn test_permutation_segmentation() {
        let depths = get_step_depths(&[(40, 1.0), (40, 3.0)]);
        let settings = CbsSettings {
            significance: ArcSignificance::Permutation {
                shuffles: 200,
                seed: 42,
            },
            ..Default::default()
        };
        let segmenter = CbsSegmenter::new(settings);
        let segments = segmenter.segment("chr1", &depths).unwrap();
        assert_ranges_tile(&segments, depths.len());
        assert!(segments.iter().any(|x| x.range.start == 40));

        // Same seed, same result
        let rerun_segments = segmenter.segment("chr1", &depths).unwrap();
        assert_eq!(segments, rerun_segments);
    }

    #[test]
    fn test_t_test_rejects_small_shift() {
        let x = [1.0, 1.1, 0.9, 1.0, 1.05, 0.95, 1.0, 1.1, 0.9, 1.0];
        assert!(!is_arc_significant_t_test(&x, 3, 6, 0.01));

        let x = [1.0, 1.1, 0.9, 5.0, 5.1, 4.9, 1.0, 1.1, 0.9, 1.0];
        assert!(is_arc_significant_t_test(&x, 3, 6, 0.01));
    }
}
