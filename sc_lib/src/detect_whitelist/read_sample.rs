use anyhow::Result;
use bio::io::fastq;
use sc_types::io_utils::open_with_gz;
use sc_types::InferenceError;
use std::io::Read;
use std::path::Path;

/// The leading bases of the first reads of a FASTQ file.
#[derive(Debug, Clone, Default)]
pub struct ReadSample {
    prefixes: Vec<Vec<u8>>,
    uniform_length: bool,
}

impl ReadSample {
    /// Read up to `max_reads` records from `path`, keeping the first
    /// `keep_bases` bases of each.
    pub fn from_fastq(
        path: &Path,
        max_reads: usize,
        keep_bases: usize,
    ) -> Result<Self, InferenceError> {
        let read_error = |reason: String| InferenceError::ReadFile {
            path: path.to_path_buf(),
            reason,
        };
        let reader = open_with_gz(path).map_err(|e| read_error(e.to_string()))?;
        Self::from_reader(reader, max_reads, keep_bases).map_err(|e| read_error(format!("{e:#}")))
    }

    pub fn from_reader<R: Read>(reader: R, max_reads: usize, keep_bases: usize) -> Result<Self> {
        let mut prefixes = Vec::with_capacity(max_reads.min(1 << 20));
        let mut first_len = None;
        let mut uniform_length = true;
        for record in fastq::Reader::new(reader).records().take(max_reads) {
            let record = record?;
            let seq = record.seq();
            match first_len {
                None => first_len = Some(seq.len()),
                Some(len) if len != seq.len() => uniform_length = false,
                Some(_) => {}
            }
            prefixes.push(seq[..seq.len().min(keep_bases)].to_vec());
        }
        Ok(ReadSample {
            prefixes,
            uniform_length,
        })
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// True if every sampled read had the same length.
    pub fn uniform_length(&self) -> bool {
        self.uniform_length
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &[u8]> {
        self.prefixes.iter().map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fastq(seqs: &[&str]) -> String {
        seqs.iter()
            .enumerate()
            .map(|(i, seq)| format!("@r{i}\n{seq}\n+\n{}\n", "I".repeat(seq.len())))
            .collect()
    }

    #[test]
    fn test_takes_prefixes_of_first_reads() -> Result<()> {
        let text = fastq(&["ACGTACGTAA", "TTTTCCCCGG", "GGGGAAAACC"]);
        let sample = ReadSample::from_reader(text.as_bytes(), 2, 4)?;
        let prefixes: Vec<_> = sample.prefixes().collect();
        assert_eq!(prefixes, [b"ACGT".as_slice(), b"TTTT".as_slice()]);
        assert!(sample.uniform_length());
        Ok(())
    }

    #[test]
    fn test_detects_mixed_lengths() -> Result<()> {
        let text = fastq(&["ACGTACGTAA", "ACG"]);
        let sample = ReadSample::from_reader(text.as_bytes(), 10, 32)?;
        assert_eq!(sample.len(), 2);
        assert!(!sample.uniform_length());
        Ok(())
    }

    #[test]
    fn test_not_fastq() {
        assert!(ReadSample::from_reader("not a fastq file\n".as_bytes(), 10, 16).is_err());
    }
}
