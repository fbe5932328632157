//! Where the pipeline puts things under the output directory.
//!
//! ```text
//! <out>/run_summary.csv
//! <out>/download_report.csv
//! <out>/samples/<sample>/fastq/
//! <out>/samples/<sample>/star/
//! <out>/samples/<sample>/attempts.jsonl
//! ```

use std::path::{Path, PathBuf};

pub const RUN_SUMMARY_FILE: &str = "run_summary.csv";
pub const DOWNLOAD_REPORT_FILE: &str = "download_report.csv";
pub const SAMPLES_DIR: &str = "samples";
pub const ATTEMPTS_FILE: &str = "attempts.jsonl";

/// Directory name of a sample. Bytes other than ASCII alphanumerics, `-`,
/// `_` and a non-leading `.` are percent-encoded, so distinct identifiers
/// never share a directory.
pub fn sample_dir_name(sample: &str) -> String {
    let mut name = String::with_capacity(sample.len());
    for (i, byte) in sample.bytes().enumerate() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') || (byte == b'.' && i > 0) {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    if name.is_empty() {
        name.push('%');
    }
    name
}

#[derive(Debug, Clone)]
pub struct SampleLayout {
    root: PathBuf,
}

impl SampleLayout {
    pub fn new(output_dir: &Path, sample: &str) -> Self {
        SampleLayout {
            root: output_dir.join(SAMPLES_DIR).join(sample_dir_name(sample)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fastq_dir(&self) -> PathBuf {
        self.root.join("fastq")
    }

    pub fn star_dir(&self) -> PathBuf {
        self.root.join("star")
    }

    pub fn attempts_log(&self) -> PathBuf {
        self.root.join(ATTEMPTS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_dir_name() {
        assert_eq!(sample_dir_name("PBMC_1k-v3.2"), "PBMC_1k-v3.2");
        assert_eq!(sample_dir_name("a/b c"), "a%2Fb%20c");
        assert_eq!(sample_dir_name("50%"), "50%25");
        assert_eq!(sample_dir_name(".."), "%2E.");
        assert_eq!(sample_dir_name("é"), "%C3%A9");
    }

    #[test]
    fn test_distinct_samples_get_distinct_dirs() {
        let out = Path::new("/out");
        let ids = ["PBMC 1", "PBMC/1", "PBMC_1", "PBMC%201", "PBMC%2F1"];
        let dirs: std::collections::HashSet<_> = ids
            .iter()
            .map(|id| SampleLayout::new(out, id).star_dir())
            .collect();
        assert_eq!(dirs.len(), ids.len());
        for dir in &dirs {
            assert_eq!(dir.parent().and_then(Path::parent), Some(Path::new("/out/samples")));
        }
    }

    #[test]
    fn test_layout() {
        let layout = SampleLayout::new(Path::new("/out"), "S1");
        assert_eq!(layout.star_dir(), Path::new("/out/samples/S1/star"));
        assert_eq!(
            layout.attempts_log(),
            Path::new("/out/samples/S1/attempts.jsonl")
        );
    }
}
