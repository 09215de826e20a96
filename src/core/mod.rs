// Core tracing logic module

pub mod app;
pub mod catalog;
pub mod command;
pub mod config;
pub mod directories;
pub mod monitors;
pub mod notes;
pub mod postprocess;
pub mod session;
pub mod toolchain;
pub mod tools;
pub mod update;

// Re-export commonly used items
pub use app::App;
pub use catalog::{Trace, TraceCatalog};
pub use command::{Command, Notice, Outcome};
pub use config::Config;
pub use notes::NotesBuffer;
pub use session::{SessionController, SessionState, TracingMode};
pub use toolchain::{Toolchain, Viewer};
