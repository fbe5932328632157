// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
// Other warnings (as of rust 1.55)
#![deny(
    const_item_mutation,
    deprecated,
    elided_lifetimes_in_paths,
    non_shorthand_field_patterns,
    renamed_and_removed_lints,
    trivial_bounds,
    type_alias_bounds,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]

use anyhow::{ensure, Context, Result};
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable naming an explicit parameters file.
pub const PARAMETERS_ENV_VAR: &str = "SCPREP_PARAMETERS";

/// No download or mapping job is ever attempted more often than this.
pub const MAX_ATTEMPTS_LIMIT: u32 = 3;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
struct Parameters {
    /// Whitelist detection reads this many leading reads of R1.
    inference_sample_reads: usize,
    /// Whitelist detection requires the best candidate to match at least this fraction.
    min_whitelist_match: f64,
    /// Candidates whose match rates differ by less than this are a tie.
    whitelist_tie_epsilon: f64,
    /// Maximum number of attempts for a download or a mapping job.
    max_attempts: u32,
    /// Delay before the first download retry.
    retry_initial_backoff_secs: u64,
    /// Upper bound on the delay between download retries.
    retry_max_backoff_secs: u64,
    /// Transfer time budget of the first download attempt.
    download_base_timeout_secs: u64,
    /// Memory given to the aligner on its first attempt.
    mapping_base_mem_gb: usize,
    /// Wall-clock limit of the aligner on its first attempt.
    mapping_base_time_mins: u64,
    /// Extra command line parameters of STAR.
    star_parameters: String,
}

const DEFAULT_PARAMETERS: Parameters = Parameters {
    inference_sample_reads: 200_000,
    min_whitelist_match: 0.5,
    whitelist_tie_epsilon: 0.01,
    max_attempts: 3,
    retry_initial_backoff_secs: 5,
    retry_max_backoff_secs: 60,
    download_base_timeout_secs: 3600,
    mapping_base_mem_gb: 32,
    mapping_base_time_mins: 240,
    star_parameters: String::new(),
};
static PARAMETERS: OnceLock<Result<Parameters>> = OnceLock::new();

/// Locate parameters.toml: the environment override first, then next to the executable.
fn parameters_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(PARAMETERS_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_exe()
        .context("Unable to locate the running executable")?
        .with_file_name("parameters.toml"))
}

fn load(path: &Path) -> Result<Parameters> {
    let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
    let params: Parameters = toml::from_str(&s).with_context(|| path.display().to_string())?;
    ensure!(
        (1..=MAX_ATTEMPTS_LIMIT).contains(&params.max_attempts),
        "{}: max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, found {}",
        path.display(),
        params.max_attempts
    );
    Ok(params)
}

/// Return a reference to the global parameters.
/// The parameters may need to be loaded; if loading fails, return Err.
fn parameters() -> &'static Result<Parameters> {
    PARAMETERS.get_or_init(|| {
        let path = parameters_path()?;
        if !path.exists() {
            warn!(
                "could not find parameters.toml at {}, falling back to defaults",
                path.display()
            );
            Ok(DEFAULT_PARAMETERS)
        } else {
            load(&path)
        }
    })
}

macro_rules! parameter_getter {
    ($a:ident, $t:ty) => {
        pub fn $a() -> Result<&'static $t> {
            let val = match parameters() {
                Err(e) => return Err(anyhow::anyhow!("{e:#}")),
                Ok(p) => &p.$a,
            };
            if DEFAULT_PARAMETERS.$a != *val {
                warn!("using non-default {} = {:?}", stringify!($a), val);
            }
            Ok(val)
        }
    };
}

parameter_getter!(inference_sample_reads, usize);
parameter_getter!(min_whitelist_match, f64);
parameter_getter!(whitelist_tie_epsilon, f64);
parameter_getter!(max_attempts, u32);
parameter_getter!(retry_initial_backoff_secs, u64);
parameter_getter!(retry_max_backoff_secs, u64);
parameter_getter!(download_base_timeout_secs, u64);
parameter_getter!(mapping_base_mem_gb, usize);
parameter_getter!(mapping_base_time_mins, u64);
parameter_getter!(star_parameters, str);
