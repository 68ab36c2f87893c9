//! Segmented read-depth profile output files
//!

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::globals::PROGRAM_VERSION;
use crate::rd_profile::RdProfile;
use crate::segmentation::SegmentationStrategy;

pub const RD_PROFILE_FILENAME: &str = "rd_profile.tsv";
pub const RD_PROFILE_SUMMARY_FILENAME: &str = "rd_profile.summary.json";

/// Write one row per segment, in chromosome order
///
fn write_rd_profile<W: Write>(
    writer: &mut W,
    chrom_list: &ChromList,
    profile: &RdProfile,
) -> std::io::Result<()> {
    writeln!(writer, "#chrom\tstart\tend\tmean_rd")?;
    for segment in profile.segments() {
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.6}",
            chrom_list.data[segment.chrom_index].label,
            segment.begin,
            segment.end,
            segment.mean_depth
        )?;
    }
    Ok(())
}

pub fn write_rd_profile_file(output_dir: &Utf8Path, chrom_list: &ChromList, profile: &RdProfile) {
    let filename = output_dir.join(RD_PROFILE_FILENAME);
    info!("Writing read-depth profile to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create read-depth profile file: '{filename}'"
    );
    let mut f = BufWriter::new(f);
    unwrap!(
        write_rd_profile(&mut f, chrom_list, profile).and_then(|_| f.flush()),
        "Unable to write read-depth profile file: '{filename}'"
    );
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ChromProfileSummary {
    pub label: String,
    pub read_count: u64,
    pub clamped_read_count: u64,
    pub total_bin_count: usize,
    pub valid_bin_count: usize,
    pub excluded_bin_count: usize,
    pub filled_bin_count: usize,
    pub mode: Option<f64>,
    pub segment_count: usize,
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub program_version: String,
    pub bin_size: u32,
    pub segmentation: SegmentationStrategy,
    pub mean_mode: Option<f64>,
    pub chroms: Vec<ChromProfileSummary>,
}

impl ProfileSummary {
    pub fn new(
        chrom_list: &ChromList,
        profile: &RdProfile,
        segmentation: SegmentationStrategy,
    ) -> Self {
        let chroms = profile
            .chroms
            .iter()
            .map(|x| ChromProfileSummary {
                label: chrom_list.data[x.chrom_index].label.clone(),
                read_count: x.read_count,
                clamped_read_count: x.clamped_read_count,
                total_bin_count: x.bin_count,
                valid_bin_count: x.valid_bin_count,
                excluded_bin_count: x.bin_count - x.valid_bin_count,
                filled_bin_count: x.filled_bin_count,
                mode: x.mode,
                segment_count: x.segments.len(),
            })
            .collect();
        Self {
            program_version: PROGRAM_VERSION.to_string(),
            bin_size: profile.bin_size,
            segmentation,
            mean_mode: profile.mean_mode,
            chroms,
        }
    }
}

/// Write profile summary out in json format
pub fn write_profile_summary(output_dir: &Utf8Path, summary: &ProfileSummary) {
    let filename = output_dir.join(RD_PROFILE_SUMMARY_FILENAME);

    info!("Writing profile summary to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create profile summary json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &summary).unwrap();
}
