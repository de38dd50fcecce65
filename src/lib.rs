//! Bundle Settlement - data-bundle ledger and transfer settlement core
//!
//! Holds each subscriber's MB balance and moves bundles between phone
//! numbers through an external settlement gateway, without ever debiting
//! twice or losing a transfer whose outcome the gateway left unclear.
//!
//! # Modules
//!
//! - [`ledger`] - Append-only balance ledger with holds
//! - [`msisdn`] - Phone number normalization
//! - [`idempotency`] - Transfer idempotency keys
//! - [`provider`] - Settlement gateway adapter (SOAP over HTTP)
//! - [`transfer`] - Transfer FSM, orchestrator and reconciliation worker
//! - [`rate_limit`] - Per-account submission counter
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod msisdn;
pub mod provider;
pub mod rate_limit;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use idempotency::{IdempotencyKey, IdempotencyKeyFactory};
pub use ledger::{AccountId, EntryKind, InMemoryLedger, LedgerEntry, LedgerError, LedgerStore};
pub use msisdn::{Msisdn, PhoneNormalizer};
pub use provider::{HttpProviderAdapter, ProviderAdapter, ProviderOutcome};
pub use transfer::{
    ReconciliationWorker, TransferError, TransferOrchestrator, TransferRequest, TransferState,
    TransferView,
};
