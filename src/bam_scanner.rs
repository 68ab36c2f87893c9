//! Alignment file scanning into binned read counts
//!

use log::{error, info};
use regex::Regex;
use rust_htslib::bam::{self, Read};
use rust_htslib::htslib;
use thousands::Separable;

use crate::chrom_list::ChromList;
use crate::depth_bins::{AlignmentPosition, GenomeReadCounts, ReadCountBinner};
use crate::rd_profile::{PipelineStage, StageError, StageErrorKind};

/// Log scan progress each time this many records have been read
const PROGRESS_RECORD_INTERVAL: u64 = 10_000_000;

/// True if the alignment record should not contribute to read depth
///
/// Unmapped, secondary, QC-failed and duplicate records are all filtered out. Supplementary
/// records are retained.
///
pub fn filter_out_alignment_record(record: &bam::Record) -> bool {
    static FLAG_FILTER: u32 =
        htslib::BAM_FUNMAP | htslib::BAM_FSECONDARY | htslib::BAM_FQCFAIL | htslib::BAM_FDUP;

    ((record.flags() as u32) & FLAG_FILTER) != 0
}

/// Flag each chromosome in `chrom_list` whose label matches `chrom_regex`
pub fn get_selected_chroms(chrom_list: &ChromList, chrom_regex: &Regex) -> Vec<bool> {
    chrom_list
        .data
        .iter()
        .map(|x| chrom_regex.is_match(&x.label))
        .collect()
}

/// Iterate over the leftmost mapped positions of all retained records in an alignment file
///
/// Records are filtered by flag and restricted to the selected chromosomes.
///
pub struct AlignmentPositionReader<'a> {
    reader: bam::Reader,
    record: bam::Record,
    selected_chroms: &'a [bool],
    record_count: u64,

    /// Chromosome index of the last record read, before any filtering, negative for unmapped
    last_tid: Option<i32>,

    /// False once any record is found out of chromosome order
    is_chrom_sorted: bool,
}

impl<'a> AlignmentPositionReader<'a> {
    pub fn new(reader: bam::Reader, selected_chroms: &'a [bool]) -> Self {
        Self {
            reader,
            record: bam::Record::new(),
            selected_chroms,
            record_count: 0,
            last_tid: None,
            is_chrom_sorted: true,
        }
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Index of the chromosome a record read error can be attributed to
    ///
    /// This is the chromosome of the last record read successfully. It is only known if that record
    /// is mapped and all records so far are in chromosome order, in which case the failed record
    /// must be on this chromosome or a later one.
    ///
    pub fn error_chrom_index(&self) -> Option<usize> {
        match self.last_tid {
            Some(tid) if tid >= 0 && self.is_chrom_sorted => Some(tid as usize),
            _ => None,
        }
    }

    fn update_chrom_order(&mut self, tid: i32) {
        // Unmapped records sort after all chromosomes
        let sort_key = |x: i32| if x < 0 { i32::MAX } else { x };
        if let Some(last_tid) = self.last_tid
            && sort_key(tid) < sort_key(last_tid)
        {
            self.is_chrom_sorted = false;
        }
        self.last_tid = Some(tid);
    }
}

impl Iterator for AlignmentPositionReader<'_> {
    type Item = Result<AlignmentPosition, rust_htslib::errors::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Err(e) = self.reader.read(&mut self.record)? {
                return Some(Err(e));
            }
            self.record_count += 1;
            self.update_chrom_order(self.record.tid());
            if self.record_count % PROGRESS_RECORD_INTERVAL == 0 {
                info!(
                    "Scanned {} alignment records",
                    self.record_count.separate_with_commas()
                );
            }

            if filter_out_alignment_record(&self.record) {
                continue;
            }

            let tid = self.record.tid();
            if tid < 0 || !self.selected_chroms[tid as usize] {
                continue;
            }

            return Some(Ok(AlignmentPosition {
                chrom_index: tid as usize,
                pos: self.record.pos(),
            }));
        }
    }
}

/// Bin the read counts of all retained records in an alignment file
///
/// A record read error in a chromosome-sorted stream ends the scan early. The chromosome of the
/// last good record, and every chromosome after it, is dropped with a logged binning stage error,
/// and the counts of all earlier chromosomes are returned. A read error which cannot be attributed
/// to a chromosome this way is returned as a binning stage error for the whole run.
///
pub fn scan_alignment_file(
    bam_filename: &str,
    ref_filename: Option<&str>,
    chrom_list: &ChromList,
    selected_chroms: &[bool],
    bin_size: u32,
    thread_count: usize,
) -> Result<GenomeReadCounts, StageError> {
    info!("Processing alignment file '{bam_filename}'");

    let binning_error = |chrom_label: &str, e: rust_htslib::errors::Error| {
        StageError::new(
            PipelineStage::Binning,
            chrom_label,
            StageErrorKind::AlignmentRecord(e.to_string()),
        )
    };

    let mut reader =
        bam::Reader::from_path(bam_filename).map_err(|e| binning_error("*", e))?;
    if let Some(ref_filename) = ref_filename {
        reader
            .set_reference(ref_filename)
            .map_err(|e| binning_error("*", e))?;
    }
    if thread_count > 1 {
        reader
            .set_threads(thread_count)
            .map_err(|e| binning_error("*", e))?;
    }

    let mut binner = ReadCountBinner::new(chrom_list, bin_size);
    let mut positions = AlignmentPositionReader::new(reader, selected_chroms);
    while let Some(position) = positions.next() {
        match position {
            Ok(position) => binner.add_position(position),
            Err(e) => {
                let Some(chrom_index) = positions.error_chrom_index() else {
                    return Err(binning_error("*", e));
                };
                let err = binning_error(&chrom_list.data[chrom_index].label, e);
                let dropped_count = binner.drop_chroms_from(chrom_index);
                error!(
                    "Skipping chromosome and all later chromosomes ({dropped_count} with binned reads): {err}"
                );
                break;
            }
        }
    }

    info!(
        "Finished processing {} alignment records",
        positions.record_count().separate_with_commas()
    );

    Ok(binner.complete_processing())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEST_SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chr1\tLN:100
@SQ\tSN:chrUn\tLN:50
r1\t0\tchr1\t10\t60\t4M\t*\t0\t0\tACGT\tIIII
r2\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII
r3\t1024\tchr1\t20\t60\t4M\t*\t0\t0\tACGT\tIIII
r4\t256\tchr1\t30\t60\t4M\t*\t0\t0\tACGT\tIIII
r5\t512\tchr1\t35\t60\t4M\t*\t0\t0\tACGT\tIIII
r6\t2048\tchr1\t40\t60\t4M\t*\t0\t0\tACGT\tIIII
r7\t16\tchr1\t50\t60\t4M\t*\t0\t0\tACGT\tIIII
r8\t0\tchrUn\t5\t60\t4M\t*\t0\t0\tACGT\tIIII
";

    fn write_test_sam(dir: &tempfile::TempDir) -> String {
        let filename = dir.path().join("test.sam");
        let mut f = std::fs::File::create(&filename).unwrap();
        f.write_all(TEST_SAM.as_bytes()).unwrap();
        filename.to_str().unwrap().to_string()
    }

    #[test]
    fn test_get_selected_chroms() {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 100);
        chrom_list.add_chrom("chrUn", 50);
        chrom_list.add_chrom("22", 10);
        let chrom_regex = Regex::new(r"^(chr)?\d{1,2}$").unwrap();
        assert_eq!(
            get_selected_chroms(&chrom_list, &chrom_regex),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_alignment_position_reader() {
        let dir = tempfile::tempdir().unwrap();
        let filename = write_test_sam(&dir);
        let reader = bam::Reader::from_path(&filename).unwrap();
        let selected_chroms = [true, false];
        let mut position_reader = AlignmentPositionReader::new(reader, &selected_chroms);
        let positions = position_reader
            .by_ref()
            .map(|x| {
                let x = x.unwrap();
                (x.chrom_index, x.pos)
            })
            .collect::<Vec<_>>();

        // Supplementary record at 40 is retained
        assert_eq!(positions, vec![(0, 9), (0, 39), (0, 49)]);
        assert_eq!(position_reader.record_count(), 8);
    }

    #[test]
    fn test_scan_alignment_file() {
        let dir = tempfile::tempdir().unwrap();
        let filename = write_test_sam(&dir);

        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 100);
        chrom_list.add_chrom("chrUn", 50);
        let selected_chroms = [true, false];

        let read_counts =
            scan_alignment_file(&filename, None, &chrom_list, &selected_chroms, 10, 1).unwrap();
        assert_eq!(read_counts.bin_size, 10);
        assert_eq!(read_counts.chroms.len(), 1);
        let chr1 = &read_counts.chroms[&0];
        assert_eq!(chr1.counts, vec![1, 0, 0, 1, 1, 0, 0, 0, 0, 0]);
        assert_eq!(chr1.clamped_read_count, 0);
    }

    const BAD_RECORD_SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chr1\tLN:100
@SQ\tSN:chr2\tLN:100
@SQ\tSN:chr3\tLN:100
r1\t0\tchr1\t10\t60\t4M\t*\t0\t0\tACGT\tIIII
r2\t0\tchr2\t5\t60\t4M\t*\t0\t0\tACGT\tIIII
r3\t0\tchr2\t20\t60\t4Z\t*\t0\t0\tACGT\tIIII
r4\t0\tchr3\t5\t60\t4M\t*\t0\t0\tACGT\tIIII
";

    fn write_sam(dir: &tempfile::TempDir, content: &str) -> String {
        let filename = dir.path().join("bad_record.sam");
        let mut f = std::fs::File::create(&filename).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        filename.to_str().unwrap().to_string()
    }

    fn get_three_chrom_list() -> ChromList {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 100);
        chrom_list.add_chrom("chr2", 100);
        chrom_list.add_chrom("chr3", 100);
        chrom_list
    }

    #[test]
    fn test_bad_record_error_chrom() {
        let dir = tempfile::tempdir().unwrap();
        let filename = write_sam(&dir, BAD_RECORD_SAM);
        let reader = bam::Reader::from_path(&filename).unwrap();
        let selected_chroms = [true, true, true];
        let mut position_reader = AlignmentPositionReader::new(reader, &selected_chroms);

        assert!(position_reader.next().unwrap().is_ok());
        assert!(position_reader.next().unwrap().is_ok());
        assert!(position_reader.next().unwrap().is_err());
        assert_eq!(position_reader.error_chrom_index(), Some(1));
    }

    #[test]
    fn test_bad_record_drops_chrom_and_later() {
        let dir = tempfile::tempdir().unwrap();
        let filename = write_sam(&dir, BAD_RECORD_SAM);
        let chrom_list = get_three_chrom_list();
        let selected_chroms = [true, true, true];

        let read_counts =
            scan_alignment_file(&filename, None, &chrom_list, &selected_chroms, 10, 1).unwrap();
        let chrom_indices = read_counts.chroms.keys().copied().collect::<Vec<_>>();
        assert_eq!(chrom_indices, vec![0]);
        assert_eq!(read_counts.chroms[&0].total_read_count(), 1);
    }

    #[test]
    fn test_unsorted_bad_record_is_fatal() {
        let unsorted_sam = "\
@HD\tVN:1.6\tSO:unsorted
@SQ\tSN:chr1\tLN:100
@SQ\tSN:chr2\tLN:100
@SQ\tSN:chr3\tLN:100
r1\t0\tchr2\t10\t60\t4M\t*\t0\t0\tACGT\tIIII
r2\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGT\tIIII
r3\t0\tchr1\t20\t60\t4Z\t*\t0\t0\tACGT\tIIII
";
        let dir = tempfile::tempdir().unwrap();
        let filename = write_sam(&dir, unsorted_sam);
        let chrom_list = get_three_chrom_list();
        let selected_chroms = [true, true, true];

        let err = scan_alignment_file(&filename, None, &chrom_list, &selected_chroms, 10, 1)
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Binning);
        assert_eq!(err.chrom_label, "*");
        assert!(!err.kind.is_chrom_local());
    }

    #[test]
    fn test_missing_alignment_file() {
        let chrom_list = ChromList::default();
        let err = scan_alignment_file("/nonexistent/test.bam", None, &chrom_list, &[], 10, 1)
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Binning);
        assert!(!err.kind.is_chrom_local());
    }
}
