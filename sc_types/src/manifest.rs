//! Reader for SDRF-style tab-separated sample manifests.
//!
//! Each distinct value of the identifier column becomes one
//! [`SampleDescriptor`]. Read-file locators are taken from every column whose
//! header contains `FASTQ_URI`; rows sharing an identifier are merged.

use crate::errors::InputError;
use crate::sample::SampleDescriptor;
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Identifier columns, in order of preference.
pub const ID_COLUMNS: [&str; 3] = ["Assay Name", "Extract Name", "Source Name"];

/// Substring marking a read-file locator column.
pub const LOCATOR_COLUMN_TAG: &str = "FASTQ_URI";

/// A parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub path: PathBuf,
    pub samples: Vec<SampleDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestReader {
    id_column: Option<String>,
}

impl ManifestReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this column for sample identifiers instead of the defaults.
    pub fn with_id_column(mut self, column: Option<String>) -> Self {
        self.id_column = column;
        self
    }

    pub fn read(&self, path: &Path) -> Result<Manifest, InputError> {
        let file = File::open(path).map_err(|source| InputError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_from(file, path)
    }

    /// Parse a manifest from any reader; `path` is used for messages only.
    pub fn read_from<R: Read>(&self, reader: R, path: &Path) -> Result<Manifest, InputError> {
        let malformed = |source| InputError::Malformed {
            path: path.to_path_buf(),
            source,
        };
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(malformed)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let id_candidates: Vec<String> = match &self.id_column {
            Some(column) => vec![column.clone()],
            None => ID_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
        };
        let Some(id_idx) = id_candidates
            .iter()
            .find_map(|c| headers.iter().position(|h| h == c))
        else {
            return Err(InputError::MissingIdColumn {
                path: path.to_path_buf(),
                candidates: id_candidates,
            });
        };
        let locator_idxs: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.contains(LOCATOR_COLUMN_TAG))
            .map(|(i, _)| i)
            .collect();
        info!(
            "manifest {}: sample id column '{}', locator columns {:?}",
            path.display(),
            headers[id_idx],
            locator_idxs.iter().map(|&i| &headers[i]).collect::<Vec<_>>()
        );

        let mut samples: Vec<SampleDescriptor> = Vec::new();
        let mut index_of: HashMap<String, usize> = HashMap::new();
        for (row_number, record) in rdr.records().enumerate() {
            let record = record.map_err(malformed)?;
            let id = record.get(id_idx).unwrap_or_default().trim();
            if id.is_empty() {
                warn!(
                    "manifest {}: row {} has no sample identifier, ignoring it",
                    path.display(),
                    row_number + 2
                );
                continue;
            }
            let idx = *index_of.entry(id.to_string()).or_insert_with(|| {
                let mut sample = SampleDescriptor::new(id, Vec::new());
                sample.metadata = headers
                    .iter()
                    .zip(record.iter())
                    .enumerate()
                    .filter(|(i, _)| *i != id_idx && !locator_idxs.contains(i))
                    .map(|(_, (h, v))| (h.clone(), v.trim().to_string()))
                    .collect();
                samples.push(sample);
                samples.len() - 1
            });
            let sample = &mut samples[idx];
            for &i in &locator_idxs {
                let locator = record.get(i).unwrap_or_default().trim();
                if !locator.is_empty() && !sample.locators.iter().any(|l| l == locator) {
                    sample.locators.push(locator.to_string());
                }
            }
        }

        if samples.is_empty() {
            return Err(InputError::NoSamples {
                path: path.to_path_buf(),
            });
        }
        Ok(Manifest {
            path: path.to_path_buf(),
            samples,
        })
    }
}
