//! Robust baseline ("mode") estimation for a depth track
//!

use std::collections::BTreeMap;

/// Width of the sliding histogram window, in per-mille depth units
pub const MODE_WINDOW_SIZE: usize = 50;

/// Convert a depth value into the integer per-mille histogram domain
fn depth_to_permille(depth: f64) -> usize {
    (depth * 1000.0).round().max(0.0) as usize
}

/// Estimate the modal depth of `depths`
///
/// Depths are rounded into an integer per-mille domain and histogrammed from zero to the maximum
/// observed value. A window of `MODE_WINDOW_SIZE` histogram buckets is slid across the histogram,
/// and the midpoint of the window position with the highest mean count is returned in the original
/// depth units. A histogram narrower than the window is treated as a single window position.
///
/// When several consecutive window positions tie for the highest mean, the center of that run is
/// used, so that an isolated peak lands in the middle of the modal window.
///
/// The histogram is stored sparsely. Window sums only change where a window edge crosses an
/// occupied bucket, so only those window positions are evaluated, and a single extreme depth does
/// not size any allocation.
///
/// Returns None for an empty input.
///
pub fn estimate_mode(depths: &[f64]) -> Option<f64> {
    let mut histogram = BTreeMap::new();
    for &depth in depths.iter() {
        *histogram.entry(depth_to_permille(depth)).or_insert(0u64) += 1;
    }

    let max_value = *histogram.keys().next_back()?;
    let last_start = max_value.saturating_sub(MODE_WINDOW_SIZE - 1);

    // Window positions where the window sum can change
    let mut window_starts = vec![0];
    for &value in histogram.keys() {
        window_starts.push(value + 1);
        if value + 1 >= MODE_WINDOW_SIZE {
            window_starts.push(value + 1 - MODE_WINDOW_SIZE);
        }
    }
    window_starts.retain(|&x| x <= last_start);
    window_starts.sort_unstable();
    window_starts.dedup();

    // Window sums are compared instead of means, all windows have the same width
    let window_sums = window_starts
        .iter()
        .map(|&start| {
            histogram
                .range(start..start + MODE_WINDOW_SIZE)
                .map(|(_, count)| count)
                .sum::<u64>()
        })
        .collect::<Vec<_>>();

    let max_sum = window_sums.iter().copied().max()?;
    let first_max_index = window_sums.iter().position(|&x| x == max_sum)?;
    let last_max_index = first_max_index
        + window_sums[first_max_index..]
            .iter()
            .take_while(|&&x| x == max_sum)
            .count()
        - 1;

    // Each evaluated sum holds until the next evaluated position
    let first_max_start = window_starts[first_max_index];
    let last_max_start = match window_starts.get(last_max_index + 1) {
        Some(&next_start) => next_start - 1,
        None => last_start,
    };
    let mode_start = (first_max_start + last_max_start) / 2;

    let mode_midpoint = mode_start as f64 + (MODE_WINDOW_SIZE as f64 / 2.0);
    Some(mode_midpoint / 1000.0)
}
