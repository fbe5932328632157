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
    irrefutable_let_patterns,
    non_shorthand_field_patterns,
    renamed_and_removed_lints,
    trivial_bounds,
    type_alias_bounds,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]

pub mod attempt;
pub mod errors;
pub mod inference;
pub mod io_utils;
pub mod manifest;
pub mod outcome;
pub mod sample;
pub mod whitelist;

pub use attempt::{Allocation, AttemptOutcome, AttemptRecord, ResourceAllocation};
pub use errors::{
    DownloadError, GroupingError, InferenceError, InputError, MappingError, StageError,
};
pub use inference::{InferenceResult, InferenceStatus, ResolvedWhitelist};
pub use manifest::{Manifest, ManifestReader};
pub use outcome::{
    PipelineStage, RunCounts, RunReport, SampleOutcome, SampleStatus, SummaryRow,
};
pub use sample::{DownloadedFile, FileSet, ReadFile, ReadNumber, SampleDescriptor};
pub use whitelist::{WhitelistCandidate, WhitelistCatalog};
