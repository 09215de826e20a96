use std::io;
use thiserror::Error;

/// Custom error type for etwdeck
#[derive(Error, Debug)]
pub enum EtwError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A trace session is already running.
    #[error("Tracing is already active ({0})")]
    AlreadyTracing(String),

    /// A stop or flush was requested while idle.
    #[error("Tracing is not active")]
    NotTracing,

    #[error("Invalid trace name: {0}")]
    InvalidName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An external program ran but reported failure. `exit_code` is `None`
    /// when the process was killed or could not be started.
    #[error("{tool} failed{}: {message}", exit_code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    ExternalTool {
        tool: String,
        exit_code: Option<i32>,
        message: String,
    },

    /// A required tool is not installed. Fatal at startup.
    #[error("Missing toolchain: {0}")]
    MissingToolchain(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for etwdeck
pub type Result<T> = std::result::Result<T, EtwError>;

impl EtwError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        EtwError::Config(msg.into())
    }

    /// Create an invalid name error
    pub fn invalid_name<S: Into<String>>(msg: S) -> Self {
        EtwError::InvalidName(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        EtwError::NotFound(msg.into())
    }

    /// Create an external tool error
    pub fn external_tool<T: Into<String>, S: Into<String>>(
        tool: T,
        exit_code: Option<i32>,
        message: S,
    ) -> Self {
        EtwError::ExternalTool {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create a missing toolchain error
    pub fn missing_toolchain<S: Into<String>>(msg: S) -> Self {
        EtwError::MissingToolchain(msg.into())
    }

    pub fn monitor<S: Into<String>>(msg: S) -> Self {
        EtwError::Monitor(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        EtwError::Other(msg.into())
    }

    /// Exit status of a failed external tool, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EtwError::ExternalTool { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Session-state errors indicate a caller bug rather than a runtime failure.
    pub fn is_precondition(&self) -> bool {
        matches!(self, EtwError::AlreadyTracing(_) | EtwError::NotTracing)
    }
}
