// Platform-specific code module

pub mod heap_tracing;
pub mod user;

pub use user::current_user_name;
