//! Ledger audit binary
//!
//! Opens a RocksDB-backed ledger, prints its summary as JSON and exits
//! non-zero when the chain does not verify.
//!
//! ```text
//! ledger-audit [config.toml]
//! ```

use anyhow::Context;
use spendwise_ledger::{Config, Ledger};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(data_dir = ?config.data_dir, "Starting ledger audit");

    let ledger = Ledger::open(config)
        .await
        .context("failed to open ledger")?;

    let summary = ledger.summary().await.context("failed to summarize ledger")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let valid = summary.integrity.valid;
    if valid {
        tracing::info!(records = summary.total_records, "Ledger chain verified");
    } else {
        for message in summary.integrity.messages() {
            tracing::error!("{}", message);
        }
    }

    ledger.shutdown().await?;

    Ok(if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
