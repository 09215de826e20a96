//! Tracing session management.

mod controller;
mod mode;
mod xperf;

pub use controller::{
    buffer_count_boost, Rollover, SessionController, TraceLocations, MAX_FILE_TRACE,
};
pub use mode::{CapturePlan, SessionState, TraceOptions, TraceSession, TracingMode};
pub use xperf::{
    MergeRequest, TraceTool, Xperf, CIRCULAR_KERNEL_LOGGER, HEAP_SESSION, NT_KERNEL_LOGGER,
    USER_SESSION,
};
