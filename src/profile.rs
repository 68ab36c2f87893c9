//! Top-level read-depth profile run
//!

use std::error;

use crate::bam_scanner::{get_selected_chroms, scan_alignment_file};
use crate::chrom_list::ChromList;
use crate::cli;
use crate::genome_ref::get_genome_ref_from_fasta;
use crate::profile_output::{ProfileSummary, write_profile_summary, write_rd_profile_file};
use crate::rd_profile::get_rd_profile;
use crate::segmentation::{CbsSegmenter, ExternalSegmenter, SegmentationStrategy, Segmenter};

fn get_segmenter(
    settings: &cli::ProfileSettings,
) -> Result<Box<dyn Segmenter>, Box<dyn error::Error>> {
    let segmenter: Box<dyn Segmenter> = match settings.segmentation {
        SegmentationStrategy::Native => Box::new(CbsSegmenter::new(settings.get_cbs_settings())),
        SegmentationStrategy::External => Box::new(ExternalSegmenter::new(
            settings.get_external_segmenter_settings(),
        )?),
    };
    Ok(segmenter)
}

pub fn run_profile(
    shared_settings: &cli::SharedSettings,
    settings: &cli::ProfileSettings,
) -> Result<(), Box<dyn error::Error>> {
    cli::write_profile_settings(&settings.output_dir, settings);

    let chrom_list = ChromList::from_bam_filename(&settings.bam_filename);
    if cli::validate_profile_settings_data(settings, &chrom_list).is_err() {
        std::process::exit(exitcode::DATAERR);
    }

    let selected_chroms = get_selected_chroms(&chrom_list, &settings.get_chrom_regex());
    let genome_ref = get_genome_ref_from_fasta(&settings.ref_filename, |label| {
        chrom_list
            .get_index(label)
            .is_some_and(|chrom_index| selected_chroms[chrom_index])
    });

    let read_counts = scan_alignment_file(
        &settings.bam_filename,
        Some(&settings.ref_filename),
        &chrom_list,
        &selected_chroms,
        settings.bin_size,
        shared_settings.thread_count,
    )?;

    let segmenter = get_segmenter(settings)?;
    let profile = get_rd_profile(
        &chrom_list,
        &genome_ref,
        &read_counts,
        segmenter.as_ref(),
        shared_settings.thread_count,
    )?;

    write_rd_profile_file(&settings.output_dir, &chrom_list, &profile);

    let summary = ProfileSummary::new(&chrom_list, &profile, settings.segmentation);
    write_profile_summary(&settings.output_dir, &summary);

    Ok(())
}
