//! Settlement Provider Adapter
//!
//! Every call to the bundle settlement gateway goes through
//! [`ProviderAdapter`]. Each operation yields exactly one of three shapes:
//!
//! - `Success(payload)`: code `200`, the operation happened
//! - `ApplicationError`: the gateway answered and said no (nothing executed)
//! - `TransportFault`: we do not know what happened
//!
//! The adapter never retries. Whether and when to retry (or reconcile) is
//! the orchestrator's decision.

pub mod codes;
pub mod envelope;
pub mod http;

pub use codes::{ResponseCategory, classify};
pub use envelope::ParseError;
pub use http::HttpProviderAdapter;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::idempotency::IdempotencyKey;
use crate::msisdn::Msisdn;

/// Dealer wallet balance as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceInfo {
    pub balance_mb: i64,
    pub expiry: Option<String>,
    pub message: String,
}

/// References the gateway assigns to an executed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub provider_ref: String,
    pub provider_txn_ref: String,
    pub message: String,
}

/// Status-check answer for a transfer the gateway executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub message: String,
    pub amount_mb: Option<i64>,
    pub provider_ref: String,
    pub provider_txn_ref: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

/// The gateway understood the request and refused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRejection {
    pub code: String,
    pub category: ResponseCategory,
    pub message: String,
}

impl ProviderRejection {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.trim().to_string(),
            category: classify(code),
            message: message.to_string(),
        }
    }

    /// Human-readable failure reason
    pub fn reason(&self) -> String {
        self.category.reason()
    }
}

/// No usable answer: the operation may or may not have happened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Load balancer / proxy error pages come back as HTML
    #[error("Gateway returned an HTML page")]
    HtmlBody,

    #[error("Malformed response: {0}")]
    Malformed(#[from] ParseError),
}

/// Outcome of a single gateway operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome<T> {
    Success(T),
    ApplicationError(ProviderRejection),
    TransportFault(TransportFault),
}

impl<T> ProviderOutcome<T> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success(_))
    }

    #[inline]
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, ProviderOutcome::TransportFault(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProviderOutcome<U> {
        match self {
            ProviderOutcome::Success(v) => ProviderOutcome::Success(f(v)),
            ProviderOutcome::ApplicationError(r) => ProviderOutcome::ApplicationError(r),
            ProviderOutcome::TransportFault(t) => ProviderOutcome::TransportFault(t),
        }
    }
}

/// Settlement gateway operations
///
/// Implementations must forward the idempotency key unchanged: the gateway
/// uses it to deduplicate and the status check looks transfers up by it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Dealer wallet balance (short timeout)
    async fn check_balance(&self) -> ProviderOutcome<BalanceInfo>;

    /// Move `amount_mb` to `destination` (long timeout)
    async fn send_transfer(
        &self,
        key: &IdempotencyKey,
        destination: &Msisdn,
        amount_mb: i64,
    ) -> ProviderOutcome<TransferReceipt>;

    /// Look up a previously sent transfer by key (short timeout)
    async fn check_status(&self, key: &IdempotencyKey) -> ProviderOutcome<StatusReport>;
}
