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
    improper_ctypes,
    improper_ctypes_definitions,
    irrefutable_let_patterns,
    non_shorthand_field_patterns,
    renamed_and_removed_lints,
    trivial_bounds,
    type_alias_bounds,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]

pub mod commands;
pub mod logging;
pub mod signals;
pub mod utils;

use sc_types::RunReport;
use std::process::ExitCode;

/// Convert something to an ExitCode.
pub trait IntoExitCode {
    fn into_exit_code(self) -> ExitCode;
}

impl IntoExitCode for &RunReport {
    /// A run with at least one completed sample is a success, even if
    /// others failed.
    fn into_exit_code(self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}
