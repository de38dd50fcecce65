//! Reconciliation Worker
//!
//! Background worker that resolves transfers whose provider outcome is
//! unknown and resumes transfers a crashed process left behind.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::coordinator::TransferOrchestrator;
use super::error::TransferError;
use crate::config::ReconciliationConfig;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a transfer must be untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum transfers to process per scan (each pass)
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&ReconciliationConfig::default())
    }
}

impl From<&ReconciliationConfig> for WorkerConfig {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_reserved_secs),
            batch_size: config.batch_size,
        }
    }
}

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Stale transfers moved to another state
    pub recovered: usize,
    /// Unknown transfers that reached COMPLETED or FAILED
    pub settled: usize,
}

/// Reconciliation Worker
///
/// Each scan first recovers stale transfers (a stale RESERVED becomes
/// PROVIDER_UNKNOWN) and then status-checks every unknown transfer that is
/// due, so a crash-orphaned transfer is resolved within one scan.
pub struct ReconciliationWorker {
    orchestrator: Arc<TransferOrchestrator>,
    config: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, config: WorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run the worker loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            batch_size = self.config.batch_size,
            "Starting reconciliation worker"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Reconciliation scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single recovery + reconciliation cycle
    pub async fn scan_once(&self) -> Result<ScanSummary, TransferError> {
        let recovered = self
            .orchestrator
            .recover_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;
        let settled = self
            .orchestrator
            .reconcile_due(self.config.batch_size)
            .await?;
        self.orchestrator.purge_rate_limits();

        let summary = ScanSummary { recovered, settled };
        if recovered > 0 || settled > 0 {
            info!(recovered, settled, "Reconciliation scan finished");
        } else {
            debug!("Nothing to reconcile");
        }
        Ok(summary)
    }
}
