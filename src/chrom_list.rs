use std::collections::HashMap;

use rust_htslib::bam;
use unwrap::unwrap;

#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub label: String,
    pub length: u64,
}

/// Ordered table of chromosome names and lengths
///
/// The chromosome index used throughout the pipeline is the index into `data`, which matches the
/// target id of the alignment file header the list was built from.
///
#[derive(Clone, Debug, Default)]
pub struct ChromList {
    pub data: Vec<ChromInfo>,
    label_to_index: HashMap<String, usize>,
}

impl ChromList {
    pub fn add_chrom(&mut self, label: &str, length: u64) {
        assert!(
            !self.label_to_index.contains_key(label),
            "Duplicate chromosome label '{label}'"
        );
        self.label_to_index
            .insert(label.to_string(), self.data.len());
        self.data.push(ChromInfo {
            label: label.to_string(),
            length,
        });
    }

    pub fn from_bam_header(header: &bam::HeaderView) -> Self {
        let mut chrom_list = Self::default();
        for tid in 0..header.target_count() {
            let label = String::from_utf8_lossy(header.tid2name(tid));
            let length = header.target_len(tid).unwrap_or(0);
            chrom_list.add_chrom(&label, length);
        }
        chrom_list
    }

    /// Read the chromosome list from the header of an alignment file
    pub fn from_bam_filename(bam_filename: &str) -> Self {
        use rust_htslib::bam::Read;

        let bam_reader = unwrap!(
            bam::Reader::from_path(bam_filename),
            "Unable to open alignment file: '{bam_filename}'"
        );
        Self::from_bam_header(bam_reader.header())
    }

    pub fn get_index(&self, label: &str) -> Option<usize> {
        self.label_to_index.get(label).copied()
    }
}
