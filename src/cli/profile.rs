use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use regex::Regex;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use super::utils::check_required_filename;
use crate::chrom_list::ChromList;
use crate::segmentation::{
    ArcSignificance, CbsSettings, ExternalSegmenterSettings, SegmentationStrategy,
};

pub const SETTINGS_FILENAME: &str = concatcp!(env!("CARGO_PKG_NAME"), ".settings.json");

/// Subdirectory of the output directory used for external segmentation working files
pub const EXTERNAL_SEGMENTATION_DIRNAME: &str = "external_segmentation";

#[derive(Args, Default, Deserialize, Serialize)]
pub struct ProfileSettings {
    /// Directory for all output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Alignment file for the sample in BAM or CRAM format
    #[arg(long = "bam", value_name = "FILE")]
    pub bam_filename: String,

    /// Genome reference in FASTA format
    #[arg(long = "ref", value_name = "FILE")]
    pub ref_filename: String,

    /// Size of the depth bins in bases
    #[arg(long, default_value_t = 1000)]
    pub bin_size: u32,

    /// Regex used to select chromosomes for profiling
    #[arg(long, value_name = "REGEX", default_value = r"^(chr)?\d{1,2}$")]
    pub chrom_regex: String,

    /// Method used to segment the GC-corrected depth track of each chromosome
    #[arg(long, value_enum, default_value_t = SegmentationStrategy::Native)]
    pub segmentation: SegmentationStrategy,

    /// Significance level for accepting a change-point in native segmentation
    #[arg(long, default_value_t = 0.01)]
    pub cbs_alpha: f64,

    /// Minimum number of bins between a new change-point and the edge of the segment it splits
    #[arg(long, default_value_t = 2)]
    pub cbs_min_segment_bins: usize,

    /// Number of shuffles used to test change-point significance in native segmentation
    ///
    /// By default change-points are tested with a Bonferroni adjusted t-test. Any value above zero
    /// switches to a permutation test with this many shuffles.
    ///
    #[arg(long, default_value_t = 0)]
    pub cbs_permutations: usize,

    /// Random seed for the permutation test
    #[arg(long, default_value_t = 1_234_567)]
    pub cbs_seed: u64,

    /// Number of partitions the depth track is split into for external segmentation
    #[arg(long, default_value_t = 50)]
    pub external_columns: usize,

    /// Command used to run the external R segmentation script
    #[arg(long, value_name = "PATH", default_value = "Rscript")]
    pub rscript: String,

    /// Time limit for each external segmentation call
    #[arg(long, default_value_t = 3600)]
    pub external_timeout_secs: u64,
}

impl ProfileSettings {
    pub fn get_cbs_settings(&self) -> CbsSettings {
        let significance = if self.cbs_permutations == 0 {
            ArcSignificance::StudentT
        } else {
            ArcSignificance::Permutation {
                shuffles: self.cbs_permutations,
                seed: self.cbs_seed,
            }
        };
        CbsSettings {
            alpha: self.cbs_alpha,
            min_segment_bins: self.cbs_min_segment_bins,
            significance,
        }
    }

    pub fn get_external_segmenter_settings(&self) -> ExternalSegmenterSettings {
        ExternalSegmenterSettings {
            rscript: self.rscript.clone(),
            column_count: self.external_columns,
            timeout_secs: self.external_timeout_secs,
            work_dir: self.output_dir.join(EXTERNAL_SEGMENTATION_DIRNAME),
        }
    }

    /// Chromosome selection regex, already checked during settings validation
    pub fn get_chrom_regex(&self) -> Regex {
        unwrap!(
            Regex::new(&self.chrom_regex),
            "Invalid chromosome regex: '{}'",
            self.chrom_regex
        )
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_profile_settings(
    settings: ProfileSettings,
) -> SimpleResult<ProfileSettings> {
    check_required_filename(&settings.ref_filename, "reference")?;
    check_required_filename(&settings.bam_filename, "alignment")?;

    if settings.bin_size == 0 {
        bail!("--bin-size argument must be greater than 0");
    }

    if let Err(e) = Regex::new(&settings.chrom_regex) {
        bail!("--chrom-regex argument is not a valid regex: {e}");
    }

    if !(settings.cbs_alpha > 0.0 && settings.cbs_alpha < 1.0) {
        bail!("--cbs-alpha argument must be in (0,1)");
    }

    if settings.cbs_min_segment_bins == 0 {
        bail!("--cbs-min-segment-bins argument must be greater than 0");
    }

    if settings.external_columns == 0 {
        bail!("--external-columns argument must be greater than 0");
    }

    if settings.external_timeout_secs == 0 {
        bail!("--external-timeout-secs argument must be greater than 0");
    }

    Ok(settings)
}

#[derive(Debug, PartialEq)]
pub enum SettingValidationError {
    UnMapped,
    NoChromMatch,
}

/// Check settings against the alignment file header
///
/// Assumes that the logger is setup
///
pub fn validate_profile_settings_data(
    settings: &ProfileSettings,
    chrom_list: &ChromList,
) -> Result<(), SettingValidationError> {
    use log::error;

    if chrom_list.data.is_empty() {
        error!(
            "Input alignment file is not mapped: '{}'",
            &settings.bam_filename
        );
        return Err(SettingValidationError::UnMapped);
    }

    let chrom_regex = settings.get_chrom_regex();
    let is_any_match = chrom_list
        .data
        .iter()
        .any(|x| chrom_regex.is_match(x.label.as_str()));

    if !is_any_match {
        error!(
            "Chromosome regex '{}' does not match any chromosome names in the input alignment file, use '--chrom-regex \".\"' to match all available chromosomes.",
            settings.chrom_regex
        );
        return Err(SettingValidationError::NoChromMatch);
    }

    Ok(())
}

/// Write profile settings out in json format
pub fn write_profile_settings(output_dir: &Utf8Path, settings: &ProfileSettings) {
    use log::info;

    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}
