//! Per-chromosome read-depth pipeline and genome-wide profile assembly
//!

use std::sync::mpsc::channel;

use log::{error, info};
use thiserror::Error;

use crate::chrom_list::ChromList;
use crate::depth_bins::{
    ChromDepthTrack, ChromReadCounts, GenomeReadCounts, get_chrom_depth_bins,
};
use crate::depth_mode::estimate_mode;
use crate::gc_content::get_chrom_gc_content;
use crate::gc_correction::gc_correct_depths;
use crate::genome_ref::GenomeRef;
use crate::rd_segments::{RdSegment, get_chrom_rd_segments, repair_undefined_segment_means};
use crate::segmentation::{SegmentationError, Segmenter};

#[derive(Clone, Copy, Debug, PartialEq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PipelineStage {
    Binning,
    GcAnnotation,
    Correction,
    Segmentation,
    Aggregation,
}

#[derive(Debug, Error)]
pub enum StageErrorKind {
    #[error("unable to read alignment record: {0}")]
    AlignmentRecord(String),

    #[error("chromosome is missing from the reference")]
    MissingReference,

    #[error("chromosome could not be read from the reference: {0}")]
    MalformedReference(String),

    #[error(
        "chromosome length in the alignment header ({header_length}) differs from the reference ({ref_length})"
    )]
    LengthMismatch { header_length: u64, ref_length: u64 },

    #[error("infinite corrected depth at bin {bin_index}")]
    InfiniteDepth { bin_index: usize },

    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error(
        "segment {segment_index} at {begin}-{end} has an undefined mean depth without defined neighbors to repair it"
    )]
    UndefinedSegmentMean {
        segment_index: usize,
        begin: u64,
        end: u64,
    },
}

impl StageErrorKind {
    /// True for input errors which only invalidate the affected chromosome
    pub fn is_chrom_local(&self) -> bool {
        matches!(
            self,
            Self::MissingReference | Self::MalformedReference(_) | Self::LengthMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed for chromosome '{chrom_label}': {kind}")]
pub struct StageError {
    pub stage: PipelineStage,
    pub chrom_label: String,
    #[source]
    pub kind: StageErrorKind,
}

impl StageError {
    pub fn new(stage: PipelineStage, chrom_label: &str, kind: StageErrorKind) -> Self {
        Self {
            stage,
            chrom_label: chrom_label.to_string(),
            kind,
        }
    }
}

/// Read-depth results for one chromosome
#[derive(Debug)]
pub struct ChromRdProfile {
    pub chrom_index: usize,
    pub read_count: u64,
    pub clamped_read_count: u64,

    /// Total bins, including bins excluded for ambiguous reference sequence
    pub bin_count: usize,

    pub valid_bin_count: usize,

    /// Number of valid zero-depth bins replaced by the chromosome's pre-correction mode
    pub filled_bin_count: usize,

    /// Modal depth of the GC-corrected track, None if the chromosome has no valid bins
    pub mode: Option<f64>,

    pub segments: Vec<RdSegment>,
}

/// Segmented read-depth profile of all processed chromosomes, in chromosome order
#[derive(Debug)]
pub struct RdProfile {
    pub bin_size: u32,
    pub chroms: Vec<ChromRdProfile>,

    /// Mean of the per-chromosome modes, over chromosomes with at least one valid bin
    pub mean_mode: Option<f64>,
}

impl RdProfile {
    pub fn segments(&self) -> impl Iterator<Item = &RdSegment> {
        self.chroms.iter().flat_map(|x| x.segments.iter())
    }
}

/// Check that the reference sequence for a chromosome exists and matches the header length
///
/// A chromosome absent from a reference whose reading stopped early is reported as malformed,
/// since it may be the record which failed to parse.
///
fn get_chrom_reference<'a>(
    chrom_list: &ChromList,
    chrom_index: usize,
    genome_ref: &'a GenomeRef,
) -> Result<&'a [u8], StageErrorKind> {
    let chrom_info = &chrom_list.data[chrom_index];
    let Some(chrom_ref) = genome_ref.chroms.get(chrom_info.label.as_str()) else {
        return Err(match &genome_ref.read_error {
            Some(read_error) => StageErrorKind::MalformedReference(read_error.to_string()),
            None => StageErrorKind::MissingReference,
        });
    };
    if chrom_ref.len() as u64 != chrom_info.length {
        return Err(StageErrorKind::LengthMismatch {
            header_length: chrom_info.length,
            ref_length: chrom_ref.len() as u64,
        });
    }
    Ok(chrom_ref)
}

/// Run GC annotation, zero-filling, GC correction and segmentation on one chromosome
///
fn get_chrom_rd_profile(
    chrom_list: &ChromList,
    chrom_index: usize,
    genome_ref: &GenomeRef,
    read_counts: &ChromReadCounts,
    bin_size: u32,
    segmenter: &dyn Segmenter,
) -> Result<ChromRdProfile, StageError> {
    let chrom_info = &chrom_list.data[chrom_index];
    let chrom_label = chrom_info.label.as_str();
    let stage_error = |stage, kind| StageError::new(stage, chrom_label, kind);

    let chrom_ref = get_chrom_reference(chrom_list, chrom_index, genome_ref)
        .map_err(|kind| stage_error(PipelineStage::GcAnnotation, kind))?;

    let bin_count = read_counts.counts.len();
    let gc_bins = get_chrom_gc_content(chrom_ref, bin_size, bin_count);
    let depth_bins = get_chrom_depth_bins(read_counts, &gc_bins, bin_size);
    let mut track = ChromDepthTrack::from_bins(&depth_bins, &gc_bins);

    let mut chrom_profile = ChromRdProfile {
        chrom_index,
        read_count: read_counts.total_read_count(),
        clamped_read_count: read_counts.clamped_read_count,
        bin_count,
        valid_bin_count: track.len(),
        filled_bin_count: 0,
        mode: None,
        segments: Vec::new(),
    };

    if track.is_empty() {
        info!("No valid depth bins found for chromosome '{chrom_label}'");
        return Ok(chrom_profile);
    }

    if let Some(fill_depth) = estimate_mode(&track.depths) {
        chrom_profile.filled_bin_count = track.fill_zero_depths(fill_depth);
    }

    gc_correct_depths(&mut track.depths, &track.gc_levels);
    if let Some(bin_index) = track.depths.iter().position(|x| x.is_infinite()) {
        return Err(stage_error(
            PipelineStage::Correction,
            StageErrorKind::InfiniteDepth {
                bin_index: track.positions[bin_index],
            },
        ));
    }
    chrom_profile.mode = estimate_mode(&track.depths);

    let segment_ranges = segmenter
        .segment(chrom_label, &track.depths)
        .map_err(|e| stage_error(PipelineStage::Segmentation, e.into()))?;

    chrom_profile.segments = get_chrom_rd_segments(
        chrom_index,
        &segment_ranges,
        &track.depths,
        &track.positions,
        bin_size,
        chrom_info.length,
    );

    info!(
        "Chromosome '{}': {} of {} bins valid, {} zero-depth bins filled, mode {:.4}, {} segments",
        chrom_label,
        chrom_profile.valid_bin_count,
        chrom_profile.bin_count,
        chrom_profile.filled_bin_count,
        chrom_profile.mode.unwrap_or(f64::NAN),
        chrom_profile.segments.len()
    );

    Ok(chrom_profile)
}

/// Produce the segmented read-depth profile for all chromosomes with binned reads
///
/// Chromosomes are processed independently on a worker pool of `thread_count` threads. Input
/// errors on one chromosome drop that chromosome from the profile, all other errors stop the run.
/// Undefined segment means are repaired once all chromosome results are in.
///
pub fn get_rd_profile(
    chrom_list: &ChromList,
    genome_ref: &GenomeRef,
    genome_read_counts: &GenomeReadCounts,
    segmenter: &dyn Segmenter,
    thread_count: usize,
) -> Result<RdProfile, StageError> {
    info!(
        "Building read-depth profile for {} chromosomes",
        genome_read_counts.chroms.len()
    );

    let bin_size = genome_read_counts.bin_size;

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .unwrap();

    let (tx, rx) = channel();
    worker_pool.scope(move |scope| {
        for (&chrom_index, read_counts) in genome_read_counts.chroms.iter() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = get_chrom_rd_profile(
                    chrom_list,
                    chrom_index,
                    genome_ref,
                    read_counts,
                    bin_size,
                    segmenter,
                );
                tx.send((chrom_index, result)).unwrap();
            });
        }
    });

    let mut results = rx.iter().collect::<Vec<_>>();
    results.sort_by_key(|(chrom_index, _)| *chrom_index);

    let mut chroms = Vec::new();
    for (_, result) in results {
        match result {
            Ok(chrom_profile) => chroms.push(chrom_profile),
            Err(err) if err.kind.is_chrom_local() => {
                error!("Skipping chromosome: {err}");
            }
            Err(err) => return Err(err),
        }
    }

    for chrom_profile in chroms.iter_mut() {
        repair_undefined_segment_means(&mut chrom_profile.segments).map_err(|x| {
            StageError::new(
                PipelineStage::Aggregation,
                &chrom_list.data[chrom_profile.chrom_index].label,
                StageErrorKind::UndefinedSegmentMean {
                    segment_index: x.segment_index,
                    begin: x.begin,
                    end: x.end,
                },
            )
        })?;
    }

    let modes = chroms.iter().filter_map(|x| x.mode).collect::<Vec<_>>();
    let mean_mode = if modes.is_empty() {
        None
    } else {
        Some(modes.iter().sum::<f64>() / modes.len() as f64)
    };

    Ok(RdProfile {
        bin_size,
        chroms,
        mean_mode,
    })
}
