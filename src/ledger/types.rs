//! Ledger Types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Balance holder id (supplied by the authentication layer)
pub type AccountId = u64;

/// Ledger entry id (monotonic per store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a ledger entry records
///
/// IDs are stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum EntryKind {
    /// Bundle purchased / loaded from the provider (credit)
    ProviderLoad = 1,
    /// Bundle clawed back by the provider (debit)
    ProviderDebit = 2,
    /// Account holder consumed data (debit)
    DataUsage = 3,
    /// Transfer to an MSISDN settled by the provider (debit)
    TransferSent = 4,
    /// Transfer received from another holder (credit)
    TransferReceived = 5,
    /// Zero-amount audit record of an ambiguous transfer that did not execute
    TransferFailedNoop = 6,
}

impl EntryKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EntryKind::ProviderLoad),
            2 => Some(EntryKind::ProviderDebit),
            3 => Some(EntryKind::DataUsage),
            4 => Some(EntryKind::TransferSent),
            5 => Some(EntryKind::TransferReceived),
            6 => Some(EntryKind::TransferFailedNoop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::ProviderLoad => "PROVIDER_LOAD",
            EntryKind::ProviderDebit => "PROVIDER_DEBIT",
            EntryKind::DataUsage => "DATA_USAGE",
            EntryKind::TransferSent => "TRANSFER_SENT",
            EntryKind::TransferReceived => "TRANSFER_RECEIVED",
            EntryKind::TransferFailedNoop => "TRANSFER_FAILED_NOOP",
        }
    }

    /// Kinds that increase the balance
    pub fn is_credit(&self) -> bool {
        matches!(self, EntryKind::ProviderLoad | EntryKind::TransferReceived)
    }

    /// Kinds that decrease the balance
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            EntryKind::ProviderDebit | EntryKind::DataUsage | EntryKind::TransferSent
        )
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, append-only balance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account_id: AccountId,
    /// Signed MB: positive credits, negative debits
    pub amount: i64,
    pub kind: EntryKind,
    /// Transfer idempotency key (or other caller correlation)
    pub correlation_id: Option<String>,
    /// Created timestamp (millis)
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Entry kind {0} cannot be used for this operation")]
    WrongKind(EntryKind),

    /// Outcome of the mutation is unknown; re-query by correlation id before retrying
    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LedgerError {
    #[inline]
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, LedgerError::InsufficientFunds { .. })
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_ids() {
        for kind in [
            EntryKind::ProviderLoad,
            EntryKind::ProviderDebit,
            EntryKind::DataUsage,
            EntryKind::TransferSent,
            EntryKind::TransferReceived,
            EntryKind::TransferFailedNoop,
        ] {
            assert_eq!(EntryKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(EntryKind::from_id(0), None);
    }

    #[test]
    fn test_entry_kind_direction() {
        assert!(EntryKind::ProviderLoad.is_credit());
        assert!(EntryKind::TransferSent.is_debit());
        assert!(!EntryKind::TransferFailedNoop.is_credit());
        assert!(!EntryKind::TransferFailedNoop.is_debit());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::InsufficientFunds {
            available: 100,
            requested: 400,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 100, requested 400"
        );
        assert!(err.is_insufficient_funds());
    }
}
