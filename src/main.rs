use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;

use sts_session_provider::config::{Config, OutputFormat};
use sts_session_provider::{
    CredentialBundle, CredentialsProvider, DynamicSessionProvider, RefreshOutcome,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level; stdout is reserved for credentials
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("STS Session Provider starting...");

    let command = config.command()?;
    let policy = config.refresh_policy()?;
    tracing::info!(
        program = %command.program(),
        lifetime_secs = policy.lifetime(),
        renew_early_secs = policy.renew_early(),
        "Refresh policy configured"
    );

    // First acquisition must succeed, there is nothing to fall back on
    let provider = match DynamicSessionProvider::connect(command, policy).await {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!("❌ Initial credential acquisition failed: {}", e);
            tracing::error!("");
            tracing::error!("🔧 Troubleshooting steps:");
            tracing::error!("   1. Run the STS command by hand and check its output");
            tracing::error!("   2. It must print export ACCESS_KEY=..., export SECRET_KEY=...");
            tracing::error!("      and export SESSION_TOKEN=... lines and exit with status 0");
            tracing::error!("   3. Arguments are split on single spaces; wrap anything needing");
            tracing::error!("      quotes in a script");
            tracing::error!("");
            return Err(e).context("Startup failed: unable to acquire session credentials");
        }
    };

    tracing::info!("✅ {} initialized", provider);
    print_credentials(&*provider.get_credentials()?, &config.output_format)?;

    if config.once {
        return Ok(());
    }

    run_refresh_loop(&provider, &config).await;

    tracing::info!("👋 Shutdown complete");

    Ok(())
}

/// Periodically renew credentials that entered the renew-early margin
async fn run_refresh_loop(provider: &DynamicSessionProvider, config: &Config) {
    let margin = provider.manager().policy().renew_early();
    let mut ticker = tokio::time::interval(Duration::from_secs(config.check_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tracing::info!(
        check_interval_secs = config.check_interval,
        "🚀 Refresh loop running"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if !provider.is_token_expiring_soon(margin) {
                    continue;
                }

                match provider.refresh_credentials().await {
                    Ok(RefreshOutcome::Refreshed(bundle)) => {
                        if let Err(e) = print_credentials(&bundle, &config.output_format) {
                            tracing::error!("Failed to write credentials: {}", e);
                        }
                    }
                    Ok(RefreshOutcome::SkippedCooldown) => {
                        tracing::debug!("Refresh skipped, credentials still in cooldown");
                    }
                    Err(e) => {
                        if provider.manager().is_expired() {
                            tracing::error!("Credentials expired and refresh failed: {}", e);
                        } else {
                            tracing::warn!("Serving current credentials until next attempt: {}", e);
                        }
                    }
                }
            }
        }
    }
}

/// Write credentials to stdout in the configured format
fn print_credentials(bundle: &CredentialBundle, format: &OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Env => bundle.to_export_lines(),
        OutputFormat::Json => {
            let mut json =
                serde_json::to_string(bundle).context("Failed to serialize credentials")?;
            json.push('\n');
            json
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|_| stdout.flush())
        .context("Failed to write credentials to stdout")?;

    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
