// UI and formatting module

pub mod formatters;
pub mod prompts;

// Re-export commonly used items for cleaner imports
pub use formatters::{
    format_cpu_frequency, format_duration, format_power, format_size, format_size_change,
    format_time, format_working_set,
};
pub use prompts::{confirm, dimmed};
