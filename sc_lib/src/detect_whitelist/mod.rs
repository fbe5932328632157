//! Detect which barcode whitelist a sample was sequenced with.
//!
//! The leading bases of the first reads of R1 are looked up in every
//! candidate whitelist. The candidate with the highest match rate wins if it
//! clears the minimum rate and no other candidate comes within the tie
//! margin; otherwise detection is inconclusive.

mod read_sample;
mod whitelist_filter;

pub use read_sample::ReadSample;
pub use whitelist_filter::{match_rate, match_rates};

use anyhow::Result;
use log::{debug, info};
use sc_types::{
    FileSet, InferenceError, InferenceResult, InferenceStatus, ResolvedWhitelist,
    WhitelistCatalog,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceConfig {
    /// Number of R1 reads to sample.
    pub sample_reads: usize,
    /// Lowest match rate a winner may have.
    pub min_match: f64,
    /// Candidates closer than this to the best rate are considered tied.
    pub tie_epsilon: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            sample_reads: 200_000,
            min_match: 0.5,
            tie_epsilon: 0.01,
        }
    }
}

impl InferenceConfig {
    pub fn from_parameters() -> Result<Self> {
        Ok(InferenceConfig {
            sample_reads: *parameters_toml::inference_sample_reads()?,
            min_match: *parameters_toml::min_whitelist_match()?,
            tie_epsilon: *parameters_toml::whitelist_tie_epsilon()?,
        })
    }
}

/// The winner of a set of match rates, if there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub best: Option<(String, f64)>,
    pub resolved: bool,
}

/// Pick the best candidate. Ties on rate are broken by name so the choice is
/// deterministic, but a tie within `tie_epsilon` is never resolved.
pub fn decide(rates: &BTreeMap<String, f64>, config: &InferenceConfig) -> Decision {
    let mut ranked: Vec<(&String, f64)> = rates.iter().map(|(name, &rate)| (name, rate)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let Some(&(best_name, best_rate)) = ranked.first() else {
        return Decision {
            best: None,
            resolved: false,
        };
    };
    let tied = ranked
        .get(1)
        .is_some_and(|&(_, runner_up)| best_rate - runner_up < config.tie_epsilon);
    Decision {
        best: Some((best_name.clone(), best_rate)),
        resolved: best_rate >= config.min_match && !tied,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParameterInferenceEngine {
    config: InferenceConfig,
}

impl ParameterInferenceEngine {
    pub fn new(config: InferenceConfig) -> Self {
        ParameterInferenceEngine { config }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Sample R1 of `file_set` and match it against `catalog`. An
    /// inconclusive match is a result, not an error.
    pub fn infer(
        &self,
        file_set: &FileSet,
        catalog: &WhitelistCatalog,
    ) -> Result<InferenceResult, InferenceError> {
        let keep_bases = catalog
            .candidates()
            .iter()
            .map(|c| c.barcode_length)
            .max()
            .unwrap_or_default();
        let r1 = file_set.barcode_read();
        let reads = ReadSample::from_fastq(&r1.path, self.config.sample_reads, keep_bases)?;
        if reads.is_empty() {
            return Err(InferenceError::EmptyReadFile {
                path: r1.path.clone(),
            });
        }
        debug!(
            "{}: sampled {} reads from {}",
            file_set.sample,
            reads.len(),
            r1.path.display()
        );
        Ok(self.classify(&file_set.sample, &reads, catalog))
    }

    pub fn classify(
        &self,
        sample: &str,
        reads: &ReadSample,
        catalog: &WhitelistCatalog,
    ) -> InferenceResult {
        let rates = match_rates(catalog, reads);
        for (name, rate) in &rates {
            info!("{sample}: {name} matches {:.1}% of reads", 100.0 * rate);
        }
        let decision = decide(&rates, &self.config);
        let whitelist = decision
            .best
            .as_ref()
            .filter(|_| decision.resolved)
            .and_then(|(name, _)| catalog.get(name))
            .map(|candidate| ResolvedWhitelist {
                name: candidate.name.clone(),
                path: candidate.path.clone(),
                barcode_length: candidate.barcode_length,
                umi_length: candidate.umi_length,
            });
        let status = if whitelist.is_some() {
            InferenceStatus::Resolved
        } else {
            InferenceStatus::Inconclusive
        };
        let (best_candidate, confidence) = match decision.best {
            Some((name, rate)) => (Some(name), rate),
            None => (None, 0.0),
        };
        InferenceResult {
            sample: sample.to_string(),
            status,
            whitelist,
            confidence,
            best_candidate,
            match_rates: rates,
            reads_sampled: reads.len(),
            uniform_read_length: reads.uniform_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sc_types::{ReadFile, WhitelistCandidate};
    use std::path::Path;

    /// A 16-base barcode starting with `first`, distinct for every `i`.
    fn barcode(first: char, i: usize) -> String {
        let mut s = String::from(first);
        for pos in 0..15 {
            s.push(['A', 'C', 'G', 'T'][(i >> (2 * pos)) & 3]);
        }
        s
    }

    fn catalog() -> WhitelistCatalog {
        let v3: Vec<_> = (0..100).map(|i| barcode('A', i)).collect();
        let v2: Vec<_> = (0..100).map(|i| barcode('C', i)).collect();
        WhitelistCatalog::new(vec![
            WhitelistCandidate::from_barcodes("3M-february-2018", "v3.txt", 16, 12, v3).unwrap(),
            WhitelistCandidate::from_barcodes("737K-august-2016", "v2.txt", 16, 10, v2).unwrap(),
        ])
    }

    fn write_r1(dir: &Path, seqs: &[String]) -> FileSet {
        let text: String = seqs
            .iter()
            .enumerate()
            .map(|(i, seq)| format!("@read{i}\n{seq}\n+\n{}\n", "F".repeat(seq.len())))
            .collect();
        let r1 = dir.join("S1_R1.fastq");
        let r2 = dir.join("S1_R2.fastq");
        std::fs::write(&r1, text).unwrap();
        std::fs::write(&r2, "").unwrap();
        FileSet {
            sample: "S1".into(),
            read1: ReadFile::from_path(&r1).unwrap(),
            read2: ReadFile::from_path(&r2).unwrap(),
        }
    }

    /// `matching` reads from the V3 whitelist, the rest with N in the barcode.
    fn v3_reads(matching: usize, total: usize) -> Vec<String> {
        (0..total)
            .map(|i| {
                let bc = if i < matching {
                    barcode('A', i % 100)
                } else {
                    "N".repeat(16)
                };
                format!("{bc}ACGTACGTACGT")
            })
            .collect()
    }

    #[test]
    fn test_resolves_dominant_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let file_set = write_r1(dir.path(), &v3_reads(98, 100));
        let result = ParameterInferenceEngine::default()
            .infer(&file_set, &catalog())
            .unwrap();

        assert!(result.is_resolved());
        assert_eq!(result.whitelist_name(), Some("3M-february-2018"));
        let wl = result.whitelist.as_ref().unwrap();
        assert_eq!((wl.barcode_length, wl.umi_length), (16, 12));
        assert!((result.confidence - 0.98).abs() < 1e-9);
        assert_eq!(result.match_rates["737K-august-2016"], 0.0);
        assert_eq!(result.reads_sampled, 100);
        assert!(result.uniform_read_length);
        assert!(result.to_error().is_none());
    }

    #[test]
    fn test_low_match_is_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        let file_set = write_r1(dir.path(), &v3_reads(20, 100));
        let result = ParameterInferenceEngine::default()
            .infer(&file_set, &catalog())
            .unwrap();

        assert_eq!(result.status, InferenceStatus::Inconclusive);
        assert_eq!(result.whitelist, None);
        assert_eq!(result.best_candidate.as_deref(), Some("3M-february-2018"));
        assert!(matches!(
            result.to_error(),
            Some(InferenceError::Inconclusive { best_rate, .. }) if (best_rate - 0.2).abs() < 1e-9
        ));
    }

    #[test]
    fn test_sample_size_limits_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut seqs = v3_reads(10, 10);
        seqs.extend(v3_reads(0, 90));
        let file_set = write_r1(dir.path(), &seqs);
        let engine = ParameterInferenceEngine::new(InferenceConfig {
            sample_reads: 10,
            ..InferenceConfig::default()
        });
        let result = engine.infer(&file_set, &catalog()).unwrap();
        assert_eq!(result.reads_sampled, 10);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_empty_r1() {
        let dir = tempfile::tempdir().unwrap();
        let file_set = write_r1(dir.path(), &[]);
        let err = ParameterInferenceEngine::default()
            .infer(&file_set, &catalog())
            .unwrap_err();
        assert!(matches!(err, InferenceError::EmptyReadFile { .. }));
    }

    #[test]
    fn test_unreadable_r1() {
        let file_set = FileSet {
            sample: "S1".into(),
            read1: ReadFile {
                path: "/nonexistent/S1_R1.fastq.gz".into(),
                bytes: 0,
            },
            read2: ReadFile {
                path: "/nonexistent/S1_R2.fastq.gz".into(),
                bytes: 0,
            },
        };
        let err = ParameterInferenceEngine::default()
            .infer(&file_set, &catalog())
            .unwrap_err();
        assert!(matches!(err, InferenceError::ReadFile { .. }));
    }

    #[test]
    fn test_decide_without_candidates() {
        let decision = decide(&BTreeMap::new(), &InferenceConfig::default());
        assert_eq!(decision.best, None);
        assert!(!decision.resolved);
    }

    fn rates(a: f64, b: f64) -> BTreeMap<String, f64> {
        [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect()
    }

    proptest! {
        #[test]
        fn prop_near_ties_are_inconclusive(a in 0.0f64..=1.0, delta in 0.0f64..0.0099) {
            let b = (a - delta).max(0.0);
            let decision = decide(&rates(a, b), &InferenceConfig::default());
            prop_assert!(!decision.resolved);
        }

        #[test]
        fn prop_clear_winner_resolves(best in 0.95f64..=1.0, gap in 0.02f64..0.95) {
            let decision = decide(&rates(best - gap, best), &InferenceConfig::default());
            prop_assert!(decision.resolved);
            prop_assert_eq!(decision.best.map(|(name, _)| name), Some("b".to_string()));
        }

        #[test]
        fn prop_below_threshold_never_resolves(best in 0.0f64..0.5, other in 0.0f64..0.5) {
            let decision = decide(&rates(best, other), &InferenceConfig::default());
            prop_assert!(!decision.resolved);
        }
    }
}
