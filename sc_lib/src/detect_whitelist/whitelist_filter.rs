use super::read_sample::ReadSample;
use sc_types::{WhitelistCandidate, WhitelistCatalog};
use std::collections::BTreeMap;

#[derive(Default)]
struct WhitelistMatchStats {
    total_reads: usize,
    reads_with_bc_in_wl: usize,
}

impl WhitelistMatchStats {
    /// Matches over all sampled reads; reads too short to hold a barcode
    /// count as misses.
    fn fraction(&self) -> f64 {
        if self.total_reads == 0 {
            0.0
        } else {
            self.reads_with_bc_in_wl as f64 / self.total_reads as f64
        }
    }
}

fn count_matches(candidate: &WhitelistCandidate, reads: &ReadSample) -> WhitelistMatchStats {
    let mut stats = WhitelistMatchStats::default();
    for prefix in reads.prefixes() {
        stats.total_reads += 1;
        if let Some(seq) = prefix.get(..candidate.barcode_length) {
            if candidate.contains(seq) {
                stats.reads_with_bc_in_wl += 1;
            }
        }
    }
    stats
}

/// Fraction of sampled reads whose leading bases are in the candidate's whitelist.
pub fn match_rate(candidate: &WhitelistCandidate, reads: &ReadSample) -> f64 {
    count_matches(candidate, reads).fraction()
}

pub fn match_rates(catalog: &WhitelistCatalog, reads: &ReadSample) -> BTreeMap<String, f64> {
    catalog
        .candidates()
        .iter()
        .map(|candidate| (candidate.name.clone(), match_rate(candidate, reads)))
        .collect()
}
