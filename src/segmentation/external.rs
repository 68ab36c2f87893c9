//! Segmentation by an external DNAcopy process
//!
//! The depth array is written as a matrix in which each column is a contiguous partition of the
//! array. DNAcopy segments each column independently and reports segments in (partition, row)
//! coordinates, which are translated back into depth array index ranges here.
//!

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{
    SegmentRange, SegmentationError, Segmenter, add_mark_counts, normalize_segment_ranges,
};

const DNACOPY_SCRIPT_FILENAME: &str = "dnacopy_segment.R";

/// Usage: Rscript dnacopy_segment.R <matrix.tsv> <segments.tsv>
const DNACOPY_SCRIPT: &str = r#"args <- commandArgs(trailingOnly = TRUE)
suppressPackageStartupMessages(library(DNAcopy))
m <- as.matrix(read.table(args[1], header = FALSE, sep = "\t", na.strings = "NA"))
n_row <- nrow(m)
cna <- CNA(m, chrom = rep(1, n_row), maploc = seq_len(n_row),
           data.type = "logratio", sampleid = seq_len(ncol(m)))
seg <- segment(cna, verbose = 0)
write.table(seg$output, file = args[2], sep = "\t", quote = FALSE,
            row.names = FALSE, col.names = FALSE)
"#;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExternalSegmenterSettings {
    /// Command used to launch the R segmentation script
    pub rscript: String,

    /// Number of partitions (matrix columns) the depth array is split into
    pub column_count: usize,

    pub timeout_secs: u64,

    /// Directory for the script, matrix and segment files
    pub work_dir: Utf8PathBuf,
}

/// Matrix dimensions used to partition a depth array of size `bin_count`
///
/// Returns (rows, columns)
///
fn get_matrix_shape(bin_count: usize, column_count: usize) -> (usize, usize) {
    let columns = std::cmp::max(std::cmp::min(column_count, bin_count), 1);
    let rows = bin_count.div_ceil(columns);
    (rows, columns)
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> SegmentationError + '_ {
    move |source| SegmentationError::Io {
        path: path.to_string(),
        source,
    }
}

/// Write depths as a tab-separated matrix where column `c` holds `depths[c*rows..(c+1)*rows]`
///
/// Cells past the end of the depth array are written as 'NA'
///
fn write_depth_matrix<W: Write>(
    writer: &mut W,
    depths: &[f64],
    rows: usize,
    columns: usize,
) -> std::io::Result<()> {
    for row in 0..rows {
        let line = (0..columns)
            .map(|column| match depths.get(column * rows + row) {
                Some(depth) => depth.to_string(),
                None => "NA".to_string(),
            })
            .join("\t");
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

/// Parse DNAcopy segment output into depth array index ranges
///
/// Each line is `partition, chromosome, start_row, end_row, mark_count, mean`, with 1-based
/// partition and row values. A segment with `start_row == end_row` extends the previous segment by
/// one bin, and adds its mark count to the previous segment. Segments entirely within the matrix
/// padding are dropped.
///
fn parse_segment_output<R: BufRead>(
    reader: R,
    path: &Utf8Path,
    rows: usize,
    columns: usize,
    bin_count: usize,
) -> Result<Vec<SegmentRange>, SegmentationError> {
    let mut segments: Vec<SegmentRange> = Vec::new();
    for (line_index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error(path))?;
        let line_number = line_index + 1;
        let line = line.trim();
        if line.is_empty() || (line_number == 1 && line.starts_with("ID\t")) {
            continue;
        }

        let malformed = || SegmentationError::MalformedOutput {
            path: path.to_string(),
            line_number,
            line: line.to_string(),
        };

        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 6 {
            return Err(malformed());
        }
        let parse_usize = |x: &str| x.parse::<usize>().map_err(|_| malformed());
        let partition = parse_usize(words[0])?;
        let start_row = parse_usize(words[2])?;
        let end_row = parse_usize(words[3])?;
        let mark_count = parse_usize(words[4])?;
        words[5].parse::<f64>().map_err(|_| malformed())?;

        if partition == 0
            || partition > columns
            || start_row == 0
            || end_row > rows
            || start_row > end_row
        {
            return Err(malformed());
        }

        let partition_offset = (partition - 1) * rows;
        let start = partition_offset + start_row - 1;
        let end = partition_offset + end_row;

        if start_row == end_row
            && let Some(last) = segments.last_mut()
        {
            last.range.end += 1;
            last.mark_count = add_mark_counts(last.mark_count, Some(mark_count));
            continue;
        }

        if start >= bin_count {
            debug!("Dropping segment from matrix padding on line {line_number} of '{path}'");
            continue;
        }
        segments.push(SegmentRange {
            range: start..std::cmp::min(end, bin_count),
            mark_count: Some(mark_count),
        });
    }
    Ok(segments)
}

/// Run `command` until it exits or `timeout` elapses
///
fn run_command_with_timeout(
    mut command: Command,
    command_label: &str,
    timeout: Duration,
) -> Result<ExitStatus, SegmentationError> {
    let mut child = command
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| SegmentationError::Launch {
            command: command_label.to_string(),
            source,
        })?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    // Best effort cleanup, the timeout is reported either way
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SegmentationError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                return Err(SegmentationError::Launch {
                    command: command_label.to_string(),
                    source,
                });
            }
        }
    }
}

/// Replace characters that aren't safe in a filename
fn get_file_label(chrom_label: &str) -> String {
    chrom_label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct ExternalSegmenter {
    settings: ExternalSegmenterSettings,
    script_path: Utf8PathBuf,
}

impl ExternalSegmenter {
    /// Create the working directory and write the R segmentation script into it
    ///
    pub fn new(settings: ExternalSegmenterSettings) -> Result<Self, SegmentationError> {
        assert!(settings.column_count > 0);

        std::fs::create_dir_all(&settings.work_dir).map_err(io_error(&settings.work_dir))?;
        let script_path = settings.work_dir.join(DNACOPY_SCRIPT_FILENAME);
        std::fs::write(&script_path, DNACOPY_SCRIPT).map_err(io_error(&script_path))?;

        info!(
            "External segmentation will run '{}' with working directory '{}'",
            settings.rscript, settings.work_dir
        );

        Ok(Self {
            settings,
            script_path,
        })
    }

    fn segment_ranges(
        &self,
        chrom_label: &str,
        depths: &[f64],
    ) -> Result<Vec<SegmentRange>, SegmentationError> {
        let bin_count = depths.len();
        let (rows, columns) = get_matrix_shape(bin_count, self.settings.column_count);

        let file_label = get_file_label(chrom_label);
        let work_dir = &self.settings.work_dir;
        let matrix_path = work_dir.join(format!("{file_label}.matrix.tsv"));
        let segment_path = work_dir.join(format!("{file_label}.segments.tsv"));
        let log_path = work_dir.join(format!("{file_label}.log"));

        {
            let f = File::create(&matrix_path).map_err(io_error(&matrix_path))?;
            let mut f = BufWriter::new(f);
            write_depth_matrix(&mut f, depths, rows, columns)
                .and_then(|_| f.flush())
                .map_err(io_error(&matrix_path))?;
        }

        let log_file = File::create(&log_path).map_err(io_error(&log_path))?;
        let log_file_err = log_file.try_clone().map_err(io_error(&log_path))?;
        let mut command = Command::new(&self.settings.rscript);
        command
            .arg(&self.script_path)
            .arg(&matrix_path)
            .arg(&segment_path)
            .stdout(log_file)
            .stderr(log_file_err);

        debug!(
            "Running external segmentation for chromosome '{chrom_label}' on a {rows}x{columns} depth matrix"
        );

        let status = run_command_with_timeout(
            command,
            &self.settings.rscript,
            Duration::from_secs(self.settings.timeout_secs),
        )?;
        if !status.success() {
            let stderr = std::fs::read_to_string(&log_path).unwrap_or_default();
            return Err(SegmentationError::CommandFailed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let f = File::open(&segment_path).map_err(io_error(&segment_path))?;
        parse_segment_output(BufReader::new(f), &segment_path, rows, columns, bin_count)
    }
}

impl Segmenter for ExternalSegmenter {
    fn segment(
        &self,
        chrom_label: &str,
        depths: &[f64],
    ) -> Result<Vec<SegmentRange>, SegmentationError> {
        if depths.is_empty() {
            return Ok(Vec::new());
        }
        let segments = self.segment_ranges(chrom_label, depths)?;
        Ok(normalize_segment_ranges(segments, depths.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{assert_ranges_tile, get_ranges};

    #[test]
    fn test_get_matrix_shape() {
        assert_eq!(get_matrix_shape(1000, 50), (20, 50));
        assert_eq!(get_matrix_shape(1001, 50), (21, 50));
        assert_eq!(get_matrix_shape(8, 50), (1, 8));
        assert_eq!(get_matrix_shape(0, 50), (0, 1));
    }

    #[test]
    fn test_write_depth_matrix() {
        let depths = [1.0, 2.0, 3.0, 4.0, 5.5];
        let (rows, columns) = get_matrix_shape(depths.len(), 2);
        let mut buf = Vec::new();
        write_depth_matrix(&mut buf, &depths, rows, columns).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf).unwrap(),
            "1\t4\n2\t5.5\n3\tNA\n"
        );
    }

    #[test]
    fn test_parse_segment_output() {
        let path = Utf8Path::new("test.tsv");
        let output = b"1\t1\t1\t3\t3\t0.5\n1\t1\t4\t4\t1\t0.6\n2\t1\t1\t2\t2\t2.0\n2\t1\t3\t4\t2\t3.0\n";
        let segments = parse_segment_output(&output[..], path, 4, 2, 7).unwrap();
        assert_eq!(get_ranges(&segments), vec![0..4, 4..6, 6..7]);

        // The single row continuation adds its mark to the preceding segment
        let mark_counts = segments.iter().map(|x| x.mark_count).collect::<Vec<_>>();
        assert_eq!(mark_counts, vec![Some(4), Some(2), Some(2)]);
    }

    #[test]
    fn test_parse_segment_output_drops_padding() {
        let path = Utf8Path::new("test.tsv");
        let output = b"ID\tchrom\tloc.start\tloc.end\tnum.mark\tseg.mean\n1\t1\t1\t4\t4\t0.5\n2\t1\t1\t2\t2\t2.0\n2\t1\t3\t4\t2\t3.0\n";
        let segments = parse_segment_output(&output[..], path, 4, 2, 5).unwrap();
        let segments = normalize_segment_ranges(segments, 5);
        assert_eq!(get_ranges(&segments), vec![0..4, 4..5]);
    }

    #[test]
    fn test_parse_malformed_segment_output() {
        let path = Utf8Path::new("test.tsv");
        for output in [
            &b"1\t1\t1\n"[..],
            &b"x\t1\t1\t3\t3\t0.5\n"[..],
            &b"3\t1\t1\t3\t3\t0.5\n"[..],
            &b"1\t1\t3\t1\t3\t0.5\n"[..],
        ] {
            let result = parse_segment_output(output, path, 4, 2, 8);
            assert!(matches!(
                result,
                Err(SegmentationError::MalformedOutput { line_number: 1, .. })
            ));
        }
    }

    #[test]
    fn test_get_file_label() {
        assert_eq!(get_file_label("chr1"), "chr1");
        assert_eq!(get_file_label("HLA-A*01:01"), "HLA-A_01_01");
    }

    #[cfg(unix)]
    mod launcher {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for the R launcher
        ///
        fn write_fake_launcher(dir: &Utf8Path, body: &str) -> String {
            let path = dir.join("fake_rscript.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string()
        }

        fn get_test_segmenter(body: &str, timeout_secs: u64) -> (tempfile::TempDir, ExternalSegmenter) {
            let dir = tempfile::tempdir().unwrap();
            let dir_path = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
            let rscript = write_fake_launcher(&dir_path, body);
            let settings = ExternalSegmenterSettings {
                rscript,
                column_count: 2,
                timeout_secs,
                work_dir: dir_path.join("work"),
            };
            (dir, ExternalSegmenter::new(settings).unwrap())
        }

        #[test]
        fn test_external_segmentation() {
            // Arguments are: script matrix output
            let body = r#"test -f "$1" || exit 3
test -f "$2" || exit 4
printf '1\t1\t1\t3\t3\t5.0\n1\t1\t4\t4\t1\t5.0\n2\t1\t1\t4\t4\t50.0\n' > "$3""#;
            let (_dir, segmenter) = get_test_segmenter(body, 30);
            let depths = [5.0, 5.0, 5.0, 5.0, 50.0, 50.0, 50.0, 50.0];
            let segments = segmenter.segment("chr1", &depths).unwrap();
            assert_ranges_tile(&segments, depths.len());
            assert_eq!(get_ranges(&segments), vec![0..4, 4..8]);
            assert_eq!(segments[0].mark_count, Some(4));
            assert_eq!(segments[1].mark_count, Some(4));
        }

        #[test]
        fn test_external_segmentation_failure() {
            let (_dir, segmenter) = get_test_segmenter("echo 'no DNAcopy' >&2\nexit 1", 30);
            let result = segmenter.segment("chr1", &[1.0, 2.0, 3.0]);
            match result {
                Err(SegmentationError::CommandFailed { stderr, .. }) => {
                    assert_eq!(stderr, "no DNAcopy");
                }
                _ => panic!("Expected command failure"),
            }
        }

        #[test]
        fn test_external_segmentation_timeout() {
            let (_dir, segmenter) = get_test_segmenter("sleep 10", 1);
            let result = segmenter.segment("chr1", &[1.0, 2.0, 3.0]);
            assert!(matches!(
                result,
                Err(SegmentationError::Timeout { timeout_secs: 1 })
            ));
        }

        #[test]
        fn test_missing_launcher() {
            let dir = tempfile::tempdir().unwrap();
            let dir_path = Utf8Path::from_path(dir.path()).unwrap();
            let settings = ExternalSegmenterSettings {
                rscript: dir_path.join("not_there").to_string(),
                column_count: 50,
                timeout_secs: 30,
                work_dir: dir_path.join("work"),
            };
            let segmenter = ExternalSegmenter::new(settings).unwrap();
            let result = segmenter.segment("chr1", &[1.0, 2.0]);
            assert!(matches!(result, Err(SegmentationError::Launch { .. })));
        }
    }
}
