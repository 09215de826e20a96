mod release_info;

pub use release_info::{fetch_latest_release, is_newer_version, parse_release, ReleaseInfo};

/// Repository queried by the version checker.
pub const RELEASE_REPO: &str = "etwdeck/etwdeck";

/// Current version of etwdeck
pub fn current_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
