//! Error types for the migration library.

use thiserror::Error;

use crate::core::{Role, Side};

/// Exit code for a run that completed without recorded errors.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code when no primary could be located on one side.
pub const EXIT_DISCOVERY_FAILED: u8 = 1;
/// Exit code when the run finished but some keys or databases failed.
pub const EXIT_PARTIAL_TRANSFER: u8 = 2;
/// Exit code for invalid configuration.
pub const EXIT_CONFIG_ERROR: u8 = 3;
/// Exit code for local I/O failures (missing config file, log file, ...).
pub const EXIT_IO_ERROR: u8 = 4;
/// Exit code for a run stopped by SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 5;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not open or authenticate a connection to a node
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// No candidate host reported itself as a writable primary
    #[error("No primary found among {side} hosts")]
    NoPrimary { side: Side },

    /// A located primary changed role while sessions were being opened
    #[error("{side} master {endpoint} now reports role={role}")]
    MasterLost {
        side: Side,
        endpoint: String,
        role: Role,
    },

    /// A command sent to a node failed
    #[error("{command} failed: {message}")]
    Command {
        command: String,
        message: String,
        transient: bool,
    },

    /// A command did not receive a reply in time
    #[error("{command} on {endpoint} timed out after {timeout_ms}ms")]
    Timeout {
        endpoint: String,
        command: String,
        timeout_ms: u64,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Connection error for the given endpoint.
    pub fn connection(endpoint: impl ToString, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Create a Command error that will not be retried.
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Command {
            command: command.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a Command error worth retrying (server busy, link dropped, ...).
    pub fn transient(command: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Command {
            command: command.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::Command { transient, .. } => *transient,
            MigrateError::Timeout { .. } | MigrateError::Connection { .. } => true,
            MigrateError::Io(_) => true,
            _ => false,
        }
    }

    /// The endpoint whose session can no longer be trusted, if any.
    ///
    /// After a dropped link or an unanswered command the session must be
    /// reopened before it is used again.
    pub fn lost_endpoint(&self) -> Option<&str> {
        match self {
            MigrateError::Connection { endpoint, .. } | MigrateError::Timeout { endpoint, .. } => {
                Some(endpoint)
            }
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::NoPrimary { .. } | MigrateError::MasterLost { .. } => {
                EXIT_DISCOVERY_FAILED
            }
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Io(_) | MigrateError::Json(_) => EXIT_IO_ERROR,
            MigrateError::Connection { .. }
            | MigrateError::Command { .. }
            | MigrateError::Timeout { .. } => EXIT_DISCOVERY_FAILED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
