use anyhow::{Context, Result};
use clap::Parser;

use crate::auth::{RefreshPolicy, StsCommand, DEFAULT_LIFETIME_SECS, DEFAULT_RENEW_EARLY_SECS};

/// STS Session Provider - keeps short-lived session credentials fresh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Command printing `export NAME=VALUE` lines (split on single spaces, no shell quoting)
    #[arg(short, long, env = "STS_COMMAND")]
    pub command: Option<String>,

    /// Validity of issued credentials in seconds
    #[arg(long, env = "TOKEN_LIFETIME", default_value_t = DEFAULT_LIFETIME_SECS)]
    pub lifetime: i64,

    /// Seconds before expiry at which credentials are renewed
    #[arg(long, env = "RENEW_EARLY_MARGIN", default_value_t = DEFAULT_RENEW_EARLY_SECS)]
    pub renew_early: i64,

    /// How often the refresh loop checks for expiring credentials, in seconds
    #[arg(long, env = "REFRESH_CHECK_INTERVAL", default_value = "30")]
    pub check_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print the credentials once and exit instead of running the refresh loop
    #[arg(long)]
    pub once: bool,

    /// Output format for printed credentials (env, json)
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "env")]
    pub format: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // STS command
    pub sts_command: String,

    // Refresh policy
    pub token_lifetime: i64,
    pub renew_early_margin: i64,
    pub check_interval: u64,

    // Output
    pub once: bool,
    pub output_format: OutputFormat,

    // Logging
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Env,  // export NAME=VALUE lines
    Json, // single JSON object
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        Ok(Config {
            sts_command: args
                .command
                .context("STS_COMMAND is required (use -c or set STS_COMMAND env var)")?,
            token_lifetime: args.lifetime,
            renew_early_margin: args.renew_early,
            check_interval: args.check_interval,
            once: args.once,
            output_format: parse_output_format(&args.format),
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.command()?;
        self.refresh_policy()?;

        if self.check_interval == 0 {
            anyhow::bail!("REFRESH_CHECK_INTERVAL must be at least 1 second");
        }

        Ok(())
    }

    pub fn command(&self) -> Result<StsCommand> {
        StsCommand::parse(&self.sts_command).context("Invalid STS_COMMAND")
    }

    pub fn refresh_policy(&self) -> Result<RefreshPolicy> {
        RefreshPolicy::new(self.token_lifetime, self.renew_early_margin)
            .context("Invalid TOKEN_LIFETIME / RENEW_EARLY_MARGIN")
    }
}

/// Parse output format from string
fn parse_output_format(s: &str) -> OutputFormat {
    match s.to_lowercase().as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Env,
    }
}
