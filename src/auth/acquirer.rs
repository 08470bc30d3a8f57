// Token acquisition from the external STS command

use async_trait::async_trait;

use super::command::{self, StsCommand};
use super::types::SessionCredentials;
use crate::error::{CredentialError, Result};

/// Source of fresh session credentials. Implementations never retry; retry
/// policy belongs to the caller.
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    async fn acquire(&self, command: &StsCommand) -> Result<SessionCredentials>;
}

/// Acquirer that runs the command as a subprocess and reads its `export` lines
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandAcquirer;

#[async_trait]
impl TokenAcquirer for CommandAcquirer {
    async fn acquire(&self, command: &StsCommand) -> Result<SessionCredentials> {
        tracing::info!(program = %command.program(), "Running STS command...");
        tracing::debug!(command = %command, "Full STS command line");

        let output = command::run_command(command.argv()).await?;

        // A failing command is not trusted even when its output looks complete
        if !output.status.success() {
            tracing::error!(
                program = %command.program(),
                status = %output.status,
                stderr = %output.stderr.trim_end(),
                "STS command failed"
            );
            return Err(CredentialError::CommandFailed {
                code: output.status.code(),
                stderr: output.stderr.trim_end().to_string(),
            });
        }

        let exports = command::parse_exports(&output.lines);
        let mut names: Vec<&str> = exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        tracing::debug!(variables = ?names, "Parsed STS command exports");

        let credentials = SessionCredentials::from_exports(&exports).map_err(|e| {
            tracing::error!("STS command output rejected: {}", e);
            e
        })?;

        tracing::info!(
            access_key_id = %credentials.access_key_id,
            "Session credentials acquired"
        );

        Ok(credentials)
    }
}
