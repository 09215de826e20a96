//! Async monitor tasks.
//!
//! Each task runs in its own independent loop with its own polling frequency
//! and exits when its shutdown channel fires.

mod cpu_frequency;
mod directory;
mod power;
mod version;
mod working_set;

pub use cpu_frequency::cpu_frequency_task;
pub use directory::{directory_task, snapshot_directory, DirectorySnapshot};
pub use power::power_status_task;
pub use version::version_check_task;
pub use working_set::{summarize_working_sets, working_set_task, ProcessMemory};
