//! Barcode whitelist candidates and the catalog they are loaded from.
//!
//! The catalog is loaded once per run and shared read-only by every sample
//! worker. Barcodes are stored 2-bit packed, so lookups never allocate.

use crate::errors::InputError;
use crate::io_utils::open_with_gz;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Optional catalog description inside a whitelist directory.
pub const CATALOG_FILE: &str = "catalog.toml";

/// Whitelists looked for when the directory has no catalog file:
/// (file stem, barcode length, UMI length).
pub const BUILTIN_WHITELISTS: [(&str, usize, usize); 4] = [
    ("3M-february-2018", 16, 12),
    ("737K-august-2016", 16, 10),
    ("737K-arc-v1", 16, 12),
    ("737K-april-2014_rc", 14, 10),
];

/// Longest barcode that fits the packed representation.
pub const MAX_BARCODE_LENGTH: usize = 32;

/// Pack an ACGT sequence of at most 32 bases into a u64.
/// Returns None for any other base, including N.
fn pack_barcode(seq: &[u8]) -> Option<u64> {
    if seq.len() > MAX_BARCODE_LENGTH {
        return None;
    }
    let mut packed = 0u64;
    for &base in seq {
        packed <<= 2;
        packed |= match base {
            b'A' | b'a' => 0,
            b'C' | b'c' => 1,
            b'G' | b'g' => 2,
            b'T' | b't' => 3,
            _ => return None,
        };
    }
    Some(packed)
}

/// One whitelist a sample could have been sequenced with.
pub struct WhitelistCandidate {
    pub name: String,
    pub path: PathBuf,
    pub barcode_length: usize,
    pub umi_length: usize,
    barcodes: HashSet<u64>,
}

impl fmt::Debug for WhitelistCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhitelistCandidate")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("barcode_length", &self.barcode_length)
            .field("umi_length", &self.umi_length)
            .field("barcodes", &self.barcodes.len())
            .finish()
    }
}

impl WhitelistCandidate {
    /// Build a candidate from in-memory barcodes.
    pub fn from_barcodes<I, S>(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        barcode_length: usize,
        umi_length: usize,
        barcodes: I,
    ) -> Result<Self, InputError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut candidate = Self::empty(name.into(), path.into(), barcode_length, umi_length)?;
        for (i, barcode) in barcodes.into_iter().enumerate() {
            candidate.insert(barcode.as_ref(), i + 1)?;
        }
        Ok(candidate)
    }

    /// Load a newline-delimited (optionally gzipped) whitelist file.
    pub fn load(
        name: impl Into<String>,
        path: &Path,
        barcode_length: usize,
        umi_length: usize,
    ) -> Result<Self, InputError> {
        let unreadable = |source| InputError::WhitelistUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let mut candidate = Self::empty(name.into(), path.to_path_buf(), barcode_length, umi_length)?;
        let reader = open_with_gz(path).map_err(unreadable)?;
        for (i, line) in reader.lines().enumerate() {
            candidate.insert(&line.map_err(unreadable)?, i + 1)?;
        }
        info!(
            "loaded whitelist {} with {} barcodes ({} bp barcode, {} bp UMI)",
            candidate.name,
            candidate.len(),
            barcode_length,
            umi_length
        );
        Ok(candidate)
    }

    fn empty(
        name: String,
        path: PathBuf,
        barcode_length: usize,
        umi_length: usize,
    ) -> Result<Self, InputError> {
        if barcode_length == 0 || barcode_length > MAX_BARCODE_LENGTH {
            return Err(InputError::InvalidCatalog {
                path,
                reason: format!(
                    "barcode length of {name} must be between 1 and {MAX_BARCODE_LENGTH}, got {barcode_length}"
                ),
            });
        }
        Ok(WhitelistCandidate {
            name,
            path,
            barcode_length,
            umi_length,
            barcodes: HashSet::new(),
        })
    }

    /// Add one whitelist line. Blank lines are ignored and a `-N` suffix is dropped.
    fn insert(&mut self, line: &str, line_number: usize) -> Result<(), InputError> {
        let Some(barcode) = line.trim().split('-').next().filter(|bc| !bc.is_empty()) else {
            return Ok(());
        };
        match pack_barcode(barcode.as_bytes()) {
            Some(packed) if barcode.len() == self.barcode_length => {
                self.barcodes.insert(packed);
                Ok(())
            }
            _ => Err(InputError::InvalidCatalog {
                path: self.path.clone(),
                reason: format!(
                    "line {line_number}: '{barcode}' is not a {}-base ACGT barcode",
                    self.barcode_length
                ),
            }),
        }
    }

    /// True if `segment` is exactly one of the whitelisted barcodes.
    pub fn contains(&self, segment: &[u8]) -> bool {
        segment.len() == self.barcode_length
            && pack_barcode(segment).is_some_and(|packed| self.barcodes.contains(&packed))
    }

    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogToml {
    whitelist: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogEntry {
    name: Option<String>,
    file: PathBuf,
    barcode_length: usize,
    umi_length: usize,
}

/// Strip `.gz` and then `.txt` from a whitelist file name.
fn whitelist_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.strip_suffix(".txt").unwrap_or(name).to_string()
}

/// The fixed set of whitelist candidates for a run, ordered by name.
#[derive(Debug)]
pub struct WhitelistCatalog {
    candidates: Vec<WhitelistCandidate>,
}

impl WhitelistCatalog {
    pub fn new(mut candidates: Vec<WhitelistCandidate>) -> Self {
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        WhitelistCatalog { candidates }
    }

    /// Load the catalog of a whitelist directory, from `catalog.toml` if
    /// present, otherwise from the built-in list of known whitelist files.
    pub fn load(dir: &Path) -> Result<Self, InputError> {
        let catalog_path = dir.join(CATALOG_FILE);
        let candidates = if catalog_path.exists() {
            Self::load_toml(dir, &catalog_path)?
        } else {
            Self::load_builtin(dir)?
        };
        if candidates.is_empty() {
            return Err(InputError::EmptyCatalog {
                path: dir.to_path_buf(),
            });
        }
        let mut names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(InputError::InvalidCatalog {
                path: dir.to_path_buf(),
                reason: format!("whitelist name '{}' appears more than once", dup[0]),
            });
        }
        Ok(Self::new(candidates))
    }

    fn load_toml(dir: &Path, catalog_path: &Path) -> Result<Vec<WhitelistCandidate>, InputError> {
        let text =
            std::fs::read_to_string(catalog_path).map_err(|source| InputError::WhitelistUnreadable {
                path: catalog_path.to_path_buf(),
                source,
            })?;
        let catalog: CatalogToml =
            toml::from_str(&text).map_err(|err| InputError::InvalidCatalog {
                path: catalog_path.to_path_buf(),
                reason: err.to_string(),
            })?;
        catalog
            .whitelist
            .into_iter()
            .map(|entry| {
                let path = dir.join(&entry.file);
                let name = entry.name.unwrap_or_else(|| whitelist_stem(&path));
                WhitelistCandidate::load(name, &path, entry.barcode_length, entry.umi_length)
            })
            .collect()
    }

    fn load_builtin(dir: &Path) -> Result<Vec<WhitelistCandidate>, InputError> {
        let mut candidates = Vec::new();
        for (stem, barcode_length, umi_length) in BUILTIN_WHITELISTS {
            let found = [format!("{stem}.txt"), format!("{stem}.txt.gz")]
                .into_iter()
                .map(|file| dir.join(file))
                .find(|path| path.exists());
            match found {
                Some(path) => candidates.push(WhitelistCandidate::load(
                    stem,
                    &path,
                    barcode_length,
                    umi_length,
                )?),
                None => debug!("whitelist {stem} not present in {}", dir.display()),
            }
        }
        Ok(candidates)
    }

    pub fn candidates(&self) -> &[WhitelistCandidate] {
        &self.candidates
    }

    pub fn get(&self, name: &str) -> Option<&WhitelistCandidate> {
        self.candidates.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
