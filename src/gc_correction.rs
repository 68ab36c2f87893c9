use log::debug;

/// Total number of distinct per-mille GC levels
const GC_LEVEL_COUNT: usize = 1001;

/// Minimum number of bins sharing a GC level for that level to be corrected
const MIN_GC_LEVEL_BIN_COUNT: u64 = 2;

#[derive(Clone)]
struct GCLevelBuilder {
    depth: f64,
    bins: u64,
}

impl GCLevelBuilder {
    fn new() -> Self {
        Self {
            depth: 0.0,
            bins: 0,
        }
    }

    fn mean_depth(&self) -> f64 {
        self.depth / self.bins as f64
    }
}

/// Per-GC-level depth normalization factors for one chromosome
///
/// Each entry is the mean depth of all bins at that GC level, or None if the level is not
/// supported by enough bins to be corrected.
///
pub struct GCLevelDepths {
    pub global_mean_depth: f64,
    pub level_mean_depths: Vec<Option<f64>>,
}

/// Find the mean depth of each per-mille GC level in a single pass over the depth track
///
pub fn get_gc_level_depths(depths: &[f64], gc_levels: &[u16]) -> GCLevelDepths {
    assert_eq!(depths.len(), gc_levels.len());

    let mut levels = vec![GCLevelBuilder::new(); GC_LEVEL_COUNT];
    let mut total = 0.0;
    for (&depth, &gc_level) in depths.iter().zip(gc_levels.iter()) {
        let level = &mut levels[gc_level as usize];
        level.depth += depth;
        level.bins += 1;
        total += depth;
    }

    let global_mean_depth = total / depths.len() as f64;
    let level_mean_depths = levels
        .iter()
        .map(|x| {
            if x.bins < MIN_GC_LEVEL_BIN_COUNT {
                None
            } else {
                Some(x.mean_depth())
            }
        })
        .collect();

    GCLevelDepths {
        global_mean_depth,
        level_mean_depths,
    }
}

/// Rescale each depth to remove the trend of depth on GC level
///
/// Each bin is scaled by `global_mean / gc_level_mean`, so that all well-supported GC levels are
/// moved to the same mean depth. Bins at a GC level with fewer than two members, or whose level mean
/// is not positive, are left unchanged.
///
/// Returns the number of corrected bins.
///
pub fn gc_correct_depths(depths: &mut [f64], gc_levels: &[u16]) -> usize {
    if depths.is_empty() {
        return 0;
    }

    let level_depths = get_gc_level_depths(depths, gc_levels);
    let global_mean_depth = level_depths.global_mean_depth;

    let mut corrected_count = 0;
    for (depth, &gc_level) in depths.iter_mut().zip(gc_levels.iter()) {
        if let Some(level_mean_depth) = level_depths.level_mean_depths[gc_level as usize]
            && level_mean_depth > 0.0
        {
            *depth = global_mean_depth * *depth / level_mean_depth;
            corrected_count += 1;
        }
    }

    debug!(
        "GC correction updated {corrected_count} of {} bins, global mean depth {global_mean_depth:.4}",
        depths.len()
    );

    corrected_count
}
