//! Reconciliation worker process
//!
//! Usage: `reconciler [--config <path>]` (default `config/reconciler.yaml`)

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use bundle_settlement::config::AppConfig;
use bundle_settlement::ledger::PgLedger;
use bundle_settlement::logging::init_logging;
use bundle_settlement::provider::{HttpProviderAdapter, ProviderAdapter};
use bundle_settlement::transfer::{
    ReconciliationWorker, TransferDb, TransferOrchestrator, WorkerConfig,
};

const DEFAULT_CONFIG: &str = "config/reconciler.yaml";

fn config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    DEFAULT_CONFIG.to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config =
        AppConfig::from_file(&path).with_context(|| format!("loading config from {}", path))?;
    let _log_guard = init_logging(&config.logging);

    let url = config
        .postgres_url
        .as_deref()
        .context("postgres_url is required")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("connecting to PostgreSQL")?;

    let ledger = PgLedger::new(pool.clone());
    ledger.migrate().await.context("running migrations")?;

    let provider = HttpProviderAdapter::new(config.provider.clone())
        .context("building provider HTTP client")?;
    info!(provider = provider.name(), endpoint = %config.provider.endpoint, "Provider adapter ready");

    let orchestrator = TransferOrchestrator::new(
        Arc::new(ledger),
        Arc::new(TransferDb::new(pool)),
        Arc::new(provider),
        &config,
    )?;

    let worker = ReconciliationWorker::new(
        Arc::new(orchestrator),
        WorkerConfig::from(&config.reconciliation),
    );
    worker.run().await
}
