//! Grouping read files into per-sample R1/R2 pairs.
//!
//! The sample identifier of a file is the part of its name before the first
//! `_` (or before the extension when there is no `_`). Read numbers come from
//! an `R1`/`R2` token, or failing that from a trailing `_1`/`_2`.

use log::warn;
use sc_types::{FileSet, GroupingError, ReadFile, ReadNumber};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

pub const ID_DELIMITER: char = '_';

const READ_FILE_SUFFIXES: [&str; 4] = [".fastq.gz", ".fq.gz", ".fastq", ".fq"];

/// Result of grouping for each sample identifier found.
pub type Groups = BTreeMap<String, Result<FileSet, GroupingError>>;

fn strip_read_suffix(name: &str) -> Option<&str> {
    READ_FILE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
}

pub fn is_read_file(name: &str) -> bool {
    strip_read_suffix(name).is_some()
}

pub fn sample_id_of(file_name: &str) -> &str {
    let stem = strip_read_suffix(file_name).unwrap_or(file_name);
    match stem.split_once(ID_DELIMITER) {
        Some((id, _)) => id,
        None => stem.split('.').next().unwrap_or(stem),
    }
}

pub fn read_number_of(file_name: &str) -> Option<ReadNumber> {
    let stem = strip_read_suffix(file_name).unwrap_or(file_name);
    let by_token = stem.split([ID_DELIMITER, '.']).find_map(|token| match token {
        "R1" => Some(ReadNumber::R1),
        "R2" => Some(ReadNumber::R2),
        _ => None,
    });
    // Only `_1`/`_2` count; `.1`/`.2` are left alone.
    by_token.or_else(|| match stem.rsplit_once(ID_DELIMITER) {
        Some((_, "1")) => Some(ReadNumber::R1),
        Some((_, "2")) => Some(ReadNumber::R2),
        _ => None,
    })
}

/// Pair the files of one sample.
pub fn pair(sample: &str, mut files: Vec<ReadFile>) -> Result<FileSet, GroupingError> {
    if files.len() != 2 {
        return Err(GroupingError::UnexpectedFileCount {
            sample: sample.to_string(),
            count: files.len(),
        });
    }
    files.sort_by_key(ReadFile::file_name);
    let numbers: Vec<_> = files.iter().map(|f| read_number_of(&f.file_name())).collect();
    match numbers.as_slice() {
        [Some(ReadNumber::R1), Some(ReadNumber::R2)] => {}
        [Some(ReadNumber::R2), Some(ReadNumber::R1)] => files.reverse(),
        _ => {
            return Err(GroupingError::UnpairedReads {
                sample: sample.to_string(),
                files: files.iter().map(ReadFile::file_name).collect(),
            })
        }
    }
    let mut files = files.into_iter();
    match (files.next(), files.next()) {
        (Some(read1), Some(read2)) => Ok(FileSet {
            sample: sample.to_string(),
            read1,
            read2,
        }),
        _ => Err(GroupingError::UnexpectedFileCount {
            sample: sample.to_string(),
            count: 0,
        }),
    }
}

/// Group read files by the sample identifier in their names.
pub fn group(files: impl IntoIterator<Item = ReadFile>) -> Groups {
    let mut by_sample: BTreeMap<String, Vec<ReadFile>> = BTreeMap::new();
    for file in files {
        let name = file.file_name();
        if !is_read_file(&name) {
            continue;
        }
        by_sample
            .entry(sample_id_of(&name).to_string())
            .or_default()
            .push(file);
    }
    by_sample
        .into_iter()
        .map(|(sample, files)| {
            let set = pair(&sample, files);
            (sample, set)
        })
        .collect()
}

/// Pick the file set of `sample` out of `groups`. With `allow_sole_group`,
/// a single group under another name is accepted as the sample's own: the
/// files were fetched for this sample, whatever they are called.
pub fn select_for_sample(
    sample: &str,
    groups: &Groups,
    allow_sole_group: bool,
) -> Result<FileSet, GroupingError> {
    if let Some(found) = groups.get(sample) {
        return found.clone();
    }
    match groups.iter().next() {
        None => Err(GroupingError::UnexpectedFileCount {
            sample: sample.to_string(),
            count: 0,
        }),
        Some((other, found)) if allow_sole_group && groups.len() == 1 => {
            warn!("{sample}: read files are named after '{other}', using them anyway");
            let mut set = found.clone()?;
            set.sample = sample.to_string();
            Ok(set)
        }
        Some(_) if allow_sole_group => Err(GroupingError::UnmatchedSample {
            sample: sample.to_string(),
            found: groups.keys().cloned().collect(),
        }),
        Some(_) => Err(GroupingError::UnexpectedFileCount {
            sample: sample.to_string(),
            count: 0,
        }),
    }
}

/// All read files under `dir`, recursively, sorted by path.
pub fn list_read_files(dir: &Path) -> io::Result<Vec<ReadFile>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if is_read_file(&entry.file_name().to_string_lossy()) {
                files.push(ReadFile::from_path(&path)?);
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn file(name: &str) -> ReadFile {
        ReadFile {
            path: PathBuf::from("/data").join(name),
            bytes: 100,
        }
    }

    #[test]
    fn test_sample_id_and_read_number() {
        assert_eq!(sample_id_of("S1_S1_L001_R1_001.fastq.gz"), "S1");
        assert_eq!(sample_id_of("SRR123.fastq"), "SRR123");
        assert_eq!(read_number_of("S1_S1_L001_R2_001.fastq.gz"), Some(ReadNumber::R2));
        assert_eq!(read_number_of("SRR123_1.fastq.gz"), Some(ReadNumber::R1));
        assert_eq!(read_number_of("SRR123_2.fq"), Some(ReadNumber::R2));
        assert_eq!(read_number_of("SRR123.fastq.gz"), None);
        assert_eq!(read_number_of("SRR1.1.fastq.gz"), None);
        assert_eq!(read_number_of("SRR1.2.fq"), None);
        assert_eq!(read_number_of("S1_L001.1.fastq.gz"), None);
        assert_eq!(read_number_of("S1.R2.fastq.gz"), Some(ReadNumber::R2));
        assert_eq!(read_number_of("S1_I1_001.fastq.gz"), None);
    }

    #[test]
    fn test_groups_pairs_in_order() {
        let groups = group(vec![
            file("S2_R2.fastq.gz"),
            file("S1_L001_R2_001.fastq.gz"),
            file("S1_L001_R1_001.fastq.gz"),
            file("S2_R1.fastq.gz"),
            file("S1.log"),
        ]);
        assert_eq!(groups.len(), 2);
        let s1 = groups["S1"].clone().unwrap();
        assert_eq!(s1.read1.file_name(), "S1_L001_R1_001.fastq.gz");
        assert_eq!(s1.read2.file_name(), "S1_L001_R2_001.fastq.gz");
        assert!(groups["S2"].is_ok());
    }

    #[test]
    fn test_wrong_file_counts() {
        let groups = group(vec![file("S1_R1.fastq.gz")]);
        assert_eq!(
            groups["S1"],
            Err(GroupingError::UnexpectedFileCount {
                sample: "S1".into(),
                count: 1
            })
        );
        let groups = group(vec![
            file("S1_R1.fastq.gz"),
            file("S1_R2.fastq.gz"),
            file("S1_I1.fastq.gz"),
        ]);
        assert!(matches!(
            groups["S1"],
            Err(GroupingError::UnexpectedFileCount { count: 3, .. })
        ));
    }

    #[test]
    fn test_two_files_without_pair() {
        let groups = group(vec![file("S1_R1_a.fastq.gz"), file("S1_R1_b.fastq.gz")]);
        assert_eq!(
            groups["S1"],
            Err(GroupingError::UnpairedReads {
                sample: "S1".into(),
                files: vec!["S1_R1_a.fastq.gz".into(), "S1_R1_b.fastq.gz".into()],
            })
        );
    }

    #[test]
    fn test_select_for_sample() {
        let groups = group(vec![file("SRR9_1.fastq.gz"), file("SRR9_2.fastq.gz")]);
        let set = select_for_sample("S1", &groups, true).unwrap();
        assert_eq!(set.sample, "S1");
        assert!(matches!(
            select_for_sample("S1", &groups, false),
            Err(GroupingError::UnexpectedFileCount { count: 0, .. })
        ));

        let groups = group(vec![
            file("A_R1.fastq.gz"),
            file("A_R2.fastq.gz"),
            file("B_R1.fastq.gz"),
            file("B_R2.fastq.gz"),
        ]);
        assert_eq!(
            select_for_sample("S1", &groups, true),
            Err(GroupingError::UnmatchedSample {
                sample: "S1".into(),
                found: vec!["A".into(), "B".into()],
            })
        );
        assert_eq!(select_for_sample("B", &groups, true).unwrap().sample, "B");
        assert!(select_for_sample("S1", &Groups::new(), true).is_err());
    }

    #[test]
    fn test_list_read_files_recurses() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("samples").join("S1").join("fastq");
        std::fs::create_dir_all(&nested)?;
        std::fs::write(nested.join("S1_R1.fastq.gz"), b"x")?;
        std::fs::write(nested.join("S1_R2.fastq.gz"), b"x")?;
        std::fs::write(nested.join("S1_R2.fastq.gz.st"), b"x")?;
        std::fs::write(dir.path().join("notes.txt"), b"x")?;
        let files = list_read_files(dir.path())?;
        let names: Vec<_> = files.iter().map(ReadFile::file_name).collect();
        assert_eq!(names, ["S1_R1.fastq.gz", "S1_R2.fastq.gz"]);
        Ok(())
    }
}
