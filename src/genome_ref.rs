use std::collections::HashMap;
use std::io::Read;

use bio::io::fasta;
use log::{error, info};
use thiserror::Error;
use unwrap::unwrap;

/// Fasta parse failure which ended reference reading early
#[derive(Clone, Debug, Error)]
#[error(
    "malformed reference fasta record after '{}': {message}",
    .after_label.as_deref().unwrap_or("start of file")
)]
pub struct ReferenceReadError {
    /// Label of the last record parsed before the failure
    pub after_label: Option<String>,
    pub message: String,
}

/// Reference sequences for the chromosomes included in the read-depth profile
///
#[derive(Default)]
pub struct GenomeRef {
    /// A map from chrom name to chrom sequence
    pub chroms: HashMap<String, Vec<u8>>,

    /// Set if reading stopped at a malformed record, chromosomes read before it are kept
    pub read_error: Option<ReferenceReadError>,
}

/// Read fasta records into GenomeRef, keeping only those accepted by `include_chrom`
///
/// Sequence case is preserved so that downstream base counting sees the reference as written.
///
/// Reading stops at the first malformed record. The error is stored in the returned GenomeRef so
/// that only chromosomes which could not be read are affected.
///
pub fn get_genome_ref_from_fasta_reader<R: Read>(
    reader: R,
    include_chrom: impl Fn(&str) -> bool,
) -> GenomeRef {
    let reader = fasta::Reader::new(reader);

    let mut genome_ref = GenomeRef::default();
    let mut last_label = None;
    for result in reader.records() {
        let record = match result {
            Ok(x) => x,
            Err(e) => {
                let read_error = ReferenceReadError {
                    after_label: last_label,
                    message: e.to_string(),
                };
                error!("Stopped reading reference: {read_error}");
                genome_ref.read_error = Some(read_error);
                break;
            }
        };
        last_label = Some(record.id().to_string());
        if !include_chrom(record.id()) {
            continue;
        }
        genome_ref
            .chroms
            .insert(record.id().to_string(), record.seq().to_vec());
    }
    genome_ref
}

/// Read the selected chromosomes of a fasta file into GenomeRef
///
pub fn get_genome_ref_from_fasta(
    filename: &str,
    include_chrom: impl Fn(&str) -> bool,
) -> GenomeRef {
    info!("Reading reference genome from file '{filename}'");

    let file = unwrap!(
        std::fs::File::open(filename),
        "Unable to open reference fasta file: '{}'",
        filename,
    );

    let genome_ref = get_genome_ref_from_fasta_reader(file, include_chrom);
    info!(
        "Read {} reference chromosome sequences",
        genome_ref.chroms.len()
    );
    genome_ref
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_genome_ref_from_fasta_reader() {
        let fasta = b">chr1 first\nACGTacgt\nNNNN\n>chrUn\nGGGG\n>chr2\nCCCC\n";
        let genome_ref =
            get_genome_ref_from_fasta_reader(&fasta[..], |label| label != "chrUn");

        assert_eq!(genome_ref.chroms.len(), 2);
        assert_eq!(genome_ref.chroms["chr1"], b"ACGTacgtNNNN".to_vec());
        assert!(!genome_ref.chroms.contains_key("chrUn"));
        assert!(genome_ref.read_error.is_none());
    }

    #[test]
    fn test_garbage_fasta() {
        let fasta = b"garbage\n>chr1\nACGT\n";
        let genome_ref = get_genome_ref_from_fasta_reader(&fasta[..], |_| true);

        assert!(genome_ref.chroms.is_empty());
        let read_error = genome_ref.read_error.unwrap();
        assert_eq!(read_error.after_label, None);
    }

    #[test]
    fn test_malformed_record_keeps_earlier_chroms() {
        let fasta = b">chr1\nACGT\n>chr2\nAC\xffGT\n>chr3\nGGGG\n";
        let genome_ref = get_genome_ref_from_fasta_reader(&fasta[..], |_| true);

        assert_eq!(genome_ref.chroms.len(), 1);
        assert_eq!(genome_ref.chroms["chr1"], b"ACGT".to_vec());
        let read_error = genome_ref.read_error.unwrap();
        assert_eq!(read_error.after_label.as_deref(), Some("chr1"));
    }
}
