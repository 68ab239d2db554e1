//! Modbus TCP session service binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sessrv::{runtime, AppConfig, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "sessrv", about = "Modbus TCP session and polling service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SESSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (overrides the configured level)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_logging(
        args.log_level
            .as_deref()
            .unwrap_or(&config.service.log_level),
    );

    if args.validate {
        info!(
            "Configuration valid: {} session(s) configured",
            config.sessions.len()
        );
        return Ok(());
    }

    info!("{} starting", config.service.name);

    let registry = Arc::new(SessionRegistry::new(Duration::from_millis(
        config.service.connect_timeout_ms,
    )));

    runtime::start_sessions(&registry, &config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for shutdown signal")?;
    info!("Shutdown signal received");

    runtime::shutdown(&registry).await;

    Ok(())
}
