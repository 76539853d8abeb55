//! Sequence input and conditioning.
//!
//! Sequences come from FASTA/FASTQ files (gzip accepted) and are split at
//! non-ACGT characters into contiguous ACGT runs before anything downstream
//! sees them. Each run keeps the color of the sequence it came from, so an
//! `N` in a reference breaks the k-mer walk without inventing sequence.

use std::path::Path;

use needletail::parse_fastx_file;

use crate::error::{Error, Result};

/// Reads all sequences of a FASTA/FASTQ file (gzip accepted), upper-cased
pub fn read_sequences(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = parse_fastx_file(path)
        .map_err(|e| Error::Parse(format!("failed to open {}: {}", path.display(), e)))?;

    let mut seqs = Vec::new();
    while let Some(record) = reader.next() {
        let record = record
            .map_err(|e| Error::Parse(format!("bad record in {}: {}", path.display(), e)))?;
        let mut seq = record.seq().to_vec();
        seq.make_ascii_uppercase();
        seqs.push(seq);
    }
    Ok(seqs)
}

/// Splits every sequence into maximal ACGT runs; each run inherits its
/// sequence's color. `colors` must have one entry per sequence.
pub fn split_at_non_acgt(seqs: &[Vec<u8>], colors: &[u64]) -> Result<(Vec<Vec<u8>>, Vec<u64>)> {
    if seqs.len() != colors.len() {
        return Err(Error::InvalidArgument(format!(
            "{} sequences but {} colors",
            seqs.len(),
            colors.len()
        )));
    }

    let mut runs = Vec::new();
    let mut run_colors = Vec::new();
    for (seq, &color) in seqs.iter().zip(colors) {
        let mut start = None;
        for (i, &b) in seq.iter().enumerate() {
            match (is_acgt(b), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push(seq[s..i].to_vec());
                    run_colors.push(color);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(seq[s..].to_vec());
            run_colors.push(color);
        }
    }
    Ok((runs, run_colors))
}

#[inline]
fn is_acgt(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_sequences_upper_cases() {
        let mut file = NamedTempFile::with_suffix(".fna").unwrap();
        writeln!(file, ">a\nacgt\n>b\nTTnnGG").unwrap();
        file.flush().unwrap();

        let seqs = read_sequences(file.path()).unwrap();
        assert_eq!(seqs, vec![b"ACGT".to_vec(), b"TTNNGG".to_vec()]);
    }

    #[test]
    fn test_split_at_non_acgt() {
        let seqs = vec![b"ACGTNNGGA".to_vec(), b"NNN".to_vec(), b"TTTT".to_vec()];
        let colors = vec![7, 8, 9];
        let (runs, run_colors) = split_at_non_acgt(&seqs, &colors).unwrap();
        assert_eq!(runs, vec![b"ACGT".to_vec(), b"GGA".to_vec(), b"TTTT".to_vec()]);
        assert_eq!(run_colors, vec![7, 7, 9]);
    }

    #[test]
    fn test_split_count_mismatch() {
        let seqs = vec![b"ACGT".to_vec()];
        assert!(split_at_non_acgt(&seqs, &[1, 2]).is_err());
    }
}
