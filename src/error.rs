// Error handling module
// Defines the credential acquisition and cache error types

use thiserror::Error;

/// Errors raised while acquiring or serving session credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The STS command could not be started (not found, not executable, ...)
    #[error("Failed to launch STS command '{program}': {source}")]
    AcquisitionLaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the command output or waiting for it failed
    #[error("I/O error while running STS command: {0}")]
    AcquisitionIo(#[from] std::io::Error),

    /// The command output did not declare every required variable
    #[error("STS command output is missing required variables: {}", .missing.join(", "))]
    AcquisitionIncomplete { missing: Vec<&'static str> },

    /// The command exited unsuccessfully
    #[error("STS command exited with {}: {stderr}", exit_code_label(.code))]
    CommandFailed { code: Option<i32>, stderr: String },

    /// Credentials requested before the first successful acquisition
    #[error("Credentials have not been initialized")]
    NotInitialized,

    /// Configured command string is empty
    #[error("STS command must not be empty")]
    EmptyCommand,

    /// Lifetime / renew-early margin combination is unusable
    #[error("Invalid refresh policy: {0}")]
    InvalidPolicy(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;
