//! Transfer Core Types

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::state::TransferState;
use crate::idempotency::IdempotencyKey;
use crate::ledger::AccountId;
use crate::msisdn::Msisdn;

/// Internal record id (ULID: sortable, no coordination)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Caller input for a new transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Sender, as supplied by the authentication layer
    pub account_id: AccountId,
    /// Destination phone number as typed
    pub destination: String,
    pub amount_mb: i64,
    /// Key of an earlier attempt being retried; `None` for a new attempt
    pub idempotency_key: Option<IdempotencyKey>,
}

impl TransferRequest {
    pub fn new(account_id: AccountId, destination: impl Into<String>, amount_mb: i64) -> Self {
        Self {
            account_id,
            destination: destination.into(),
            amount_mb,
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Persisted transfer (one per attempt, never deleted)
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub idempotency_key: IdempotencyKey,
    pub account_id: AccountId,
    pub destination_raw: String,
    /// Set once validation normalizes the destination
    pub destination: Option<Msisdn>,
    pub amount_mb: i64,
    pub state: TransferState,
    pub failure_reason: Option<String>,
    pub provider_ref: Option<String>,
    pub provider_txn_ref: Option<String>,
    pub reconcile_attempts: u32,
    /// Earliest time (millis) of the next status check
    pub next_reconcile_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TransferRecord {
    pub fn new(
        idempotency_key: IdempotencyKey,
        account_id: AccountId,
        destination_raw: String,
        amount_mb: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            transfer_id: TransferId::new(),
            idempotency_key,
            account_id,
            destination_raw,
            destination: None,
            amount_mb,
            state: TransferState::Requested,
            failure_reason: None,
            provider_ref: None,
            provider_txn_ref: None,
            reconcile_attempts: 0,
            next_reconcile_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// What the caller sees
    pub fn view(&self) -> TransferView {
        match self.state {
            TransferState::Completed => TransferView::Completed {
                reference: self
                    .provider_txn_ref
                    .clone()
                    .or_else(|| self.provider_ref.clone())
                    .unwrap_or_default(),
            },
            TransferState::Failed => TransferView::Failed {
                reason: self
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "Transfer failed".to_string()),
            },
            _ => TransferView::Pending {
                key: self.idempotency_key.clone(),
            },
        }
    }
}

/// Caller-visible transfer result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferView {
    Completed { reference: String },
    Failed { reason: String },
    /// Outcome not known yet; poll with the key
    Pending { key: IdempotencyKey },
}

impl TransferView {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferView::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransferView::Failed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TransferView::Pending { .. })
    }
}

/// Operator decision for a transfer in manual review
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The gateway executed it: debit and complete
    Completed {
        provider_ref: String,
        provider_txn_ref: String,
    },
    /// The gateway did not execute it: release and fail
    Failed { reason: String },
}

/// Fields written together with a state transition. `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub destination: Option<Msisdn>,
    pub failure_reason: Option<String>,
    pub provider_ref: Option<String>,
    pub provider_txn_ref: Option<String>,
    pub reconcile_attempts: Option<u32>,
    pub next_reconcile_at: Option<i64>,
}

impl StateUpdate {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn references(provider_ref: String, provider_txn_ref: String) -> Self {
        Self {
            provider_ref: Some(provider_ref),
            provider_txn_ref: Some(provider_txn_ref),
            ..Default::default()
        }
    }

    pub(crate) fn apply(&self, record: &mut TransferRecord) {
        if let Some(d) = &self.destination {
            record.destination = Some(d.clone());
        }
        if let Some(r) = &self.failure_reason {
            record.failure_reason = Some(r.clone());
        }
        if let Some(r) = &self.provider_ref {
            record.provider_ref = Some(r.clone());
        }
        if let Some(r) = &self.provider_txn_ref {
            record.provider_txn_ref = Some(r.clone());
        }
        if let Some(a) = self.reconcile_attempts {
            record.reconcile_attempts = a;
        }
        if let Some(t) = self.next_reconcile_at {
            record.next_reconcile_at = Some(t);
        }
    }
}
