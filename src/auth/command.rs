// STS command execution and output parsing

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::{CredentialError, Result};

/// Bytes of stderr kept for diagnostics; the rest is read and discarded
pub const MAX_STDERR_BYTES: usize = 4096;

static EXPORT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^export\s+(\w+)=(.*)$").unwrap());

/// Command line of the external token issuer.
///
/// The string is split on literal single spaces, nothing more: there is no
/// shell quoting, escaping or globbing, and consecutive spaces yield empty
/// arguments. Programs whose arguments contain spaces must be wrapped in a
/// script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsCommand {
    raw: String,
    argv: Vec<String>,
}

impl StsCommand {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(CredentialError::EmptyCommand);
        }

        Ok(Self {
            raw: raw.to_string(),
            argv: raw.split(' ').map(str::to_string).collect(),
        })
    }

    /// Program to launch (first argv entry)
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for StsCommand {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Everything observed from one run of the command
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// Standard output, one entry per line, in order
    pub lines: Vec<String>,
    /// Standard error, captured for diagnostics only and capped at
    /// `MAX_STDERR_BYTES` plus a truncation note
    pub stderr: String,
}

/// Spawn `argv`, drain stdout line by line and stderr to the end, then wait for exit.
/// Stdout must be valid UTF-8, otherwise the run fails with `AcquisitionIo`.
/// Nothing is written to the child's stdin.
pub async fn run_command(argv: &[String]) -> Result<CommandOutput> {
    let (program, args) = argv.split_first().ok_or(CredentialError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CredentialError::AcquisitionLaunchFailed {
            program: program.clone(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

    // Both pipes are drained together so a chatty stderr cannot stall the child
    let read_stdout = async {
        let mut reader = BufReader::new(stdout).lines();
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await? {
            lines.push(line);
        }
        Ok::<_, io::Error>(lines)
    };
    let read_stderr = async {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        (&mut reader)
            .take(MAX_STDERR_BYTES as u64)
            .read_to_end(&mut buf)
            .await?;
        let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

        let mut text = String::from_utf8_lossy(&buf).into_owned();
        if dropped > 0 {
            text.push_str(&format!("... ({} more bytes truncated)", dropped));
        }
        Ok::<_, io::Error>(text)
    };

    let (lines, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
    let status = child.wait().await?;

    tracing::debug!(
        program = %program,
        status = %status,
        lines = lines.len(),
        "STS command finished"
    );

    Ok(CommandOutput {
        status,
        lines,
        stderr,
    })
}

/// Collect `export NAME=VALUE` declarations. Non-matching lines are ignored and
/// a later declaration of the same name replaces an earlier one.
pub fn parse_exports<I, S>(lines: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut exports = HashMap::new();
    for line in lines {
        if let Some(caps) = EXPORT_PATTERN.captures(line.as_ref()) {
            exports.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    exports
}
