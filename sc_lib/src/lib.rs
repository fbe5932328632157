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

pub mod cancel;
pub mod coordinator;
pub mod detect_whitelist;
pub mod download;
pub mod grouping;
pub mod layout;
pub mod mapping;
pub mod process;
pub mod report;
pub mod retry;
pub mod star;

pub use cancel::CancelToken;
pub use coordinator::{CoordinatorConfig, Mapper, PipelineCoordinator, RunMode};
pub use detect_whitelist::{InferenceConfig, ParameterInferenceEngine};
pub use download::{AxelTransport, Downloader, Transport};
pub use mapping::{AlignmentTool, MappingOrchestrator};
pub use retry::RetryPolicy;
pub use star::StarAligner;
