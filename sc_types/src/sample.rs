//! Samples and their read files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One sample of the manifest: an identifier, where its reads live, and the
/// remaining manifest columns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SampleDescriptor {
    pub id: String,
    pub locators: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SampleDescriptor {
    pub fn new(id: impl Into<String>, locators: Vec<String>) -> Self {
        SampleDescriptor {
            id: id.into(),
            locators,
            metadata: BTreeMap::new(),
        }
    }
}

impl fmt::Display for SampleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} read files)", self.id, self.locators.len())
    }
}

/// Which read of a pair a file holds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadNumber {
    R1,
    R2,
}

/// A local read file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReadFile {
    pub path: PathBuf,
    pub bytes: u64,
}

impl ReadFile {
    /// Stat `path` for its size.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(ReadFile {
            path: path.to_path_buf(),
            bytes: std::fs::metadata(path)?.len(),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// True if the file is gzip compressed, judged by its extension.
    pub fn is_gzipped(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "gz")
    }
}

/// A read file fetched by the downloader.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadedFile {
    pub sample: String,
    pub locator: String,
    pub file: ReadFile,
    pub attempts: u32,
}

/// The read pair of one sample. Always exactly two files.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileSet {
    pub sample: String,
    pub read1: ReadFile,
    pub read2: ReadFile,
}

impl FileSet {
    /// The R1 file, which carries the barcode and UMI.
    pub fn barcode_read(&self) -> &ReadFile {
        &self.read1
    }

    pub fn total_bytes(&self) -> u64 {
        self.read1.bytes + self.read2.bytes
    }
}

impl fmt::Display for FileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: R1={} R2={}",
            self.sample,
            self.read1.path.display(),
            self.read2.path.display()
        )
    }
}
