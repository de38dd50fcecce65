//! Bundle Transfer FSM
//!
//! Moves MB from a subscriber's ledger balance to another phone number
//! through the settlement gateway.
//!
//! # Architecture
//!
//! The transfer module uses a Persistent FSM to coordinate two independent
//! systems that cannot share a transaction:
//! - **Ledger** (local balance + holds, `bundle_accounts_tb`)
//! - **Settlement gateway** (remote, reached over SOAP/HTTP)
//!
//! # State Machine
//!
//! ```text
//! REQUESTED → RESERVED → PROVIDER_ACCEPTED → COMPLETED
//!     ↓          │ │            ↓
//!  FAILED ←──────┘ │      MANUAL_REVIEW
//!     ↑            ↓            ↑
//! PROVIDER_REJECTED  PROVIDER_UNKNOWN ⇄ RECONCILING
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: RESERVED is stored before the gateway is called
//! 2. **Explicit Fail Rule**: a hold is only released on an explicit "no",
//!    never on a timeout or unreadable answer
//! 3. **Idempotency**: the key is forwarded to the gateway and is the ledger
//!    correlation id, so every retry lands on the same transfer and debit
//! 4. **Single debit**: COMPLETED implies exactly one `TRANSFER_SENT` entry

pub mod coordinator;
pub mod db;
pub mod error;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;


// Re-exports for convenience
pub use coordinator::TransferOrchestrator;
pub use db::TransferDb;
pub use error::{TransferError, ValidationError};
pub use state::TransferState;
pub use store::{InMemoryTransferStore, TransferStore};
pub use types::{Resolution, TransferId, TransferRecord, TransferRequest, TransferView};
pub use worker::{ReconciliationWorker, WorkerConfig};

/// Config for in-process tests: no rate limit, no grace or backoff delays
#[cfg(test)]
pub(crate) fn test_config() -> crate::config::AppConfig {
    crate::config::AppConfig::from_yaml(
        r#"
provider:
  endpoint: "http://127.0.0.1:1/dealer"
  username: "dealer01"
  password: "secret"
  dealer_msisdn: "233244000111"
transfer:
  min_amount: 50
  key_prefix: "BDL"
  submit_wait_ms: 2000
reconciliation:
  scan_interval_secs: 1
  grace_period_secs: 0
  stale_reserved_secs: 60
  base_backoff_secs: 0
  max_backoff_secs: 0
  max_attempts: 3
  batch_size: 100
rate_limit:
  enabled: false
  max_submissions: 1
  window_secs: 60
"#,
    )
    .expect("test config")
}
