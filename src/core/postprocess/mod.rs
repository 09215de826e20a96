//! Post-processing of completed traces.

mod queue;
mod transforms;

pub use queue::{PostProcessJob, PostProcessQueue};
pub use transforms::{PostProcessor, TransformKind, TransformOutcome, TransformReport};
