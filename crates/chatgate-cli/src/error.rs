//! CLI-specific error types and exit codes.

use std::path::PathBuf;

use chatgate_core::ConfigError;
use chatgate_proxy::ServeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration file could not be read.
    #[error("Cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("Cannot parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// A configuration value was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The gateway failed to start or stop.
    #[error("Server error: {0}")]
    Serve(#[from] ServeError),
}

impl CliError {
    /// Map the error to a process exit code (sysexits.h where one fits).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 74,    // EX_IOERR
            Self::Parse { .. } => 65, // EX_DATAERR
            Self::Config(_) => 78,    // EX_CONFIG
            Self::Serve(_) => 1,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
