//! Transfer Error Types

use thiserror::Error;

use crate::idempotency::KeyError;
use crate::ledger::{AccountId, LedgerError};
use crate::msisdn::MsisdnError;

/// Request rejected before any funds or provider call are touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount {amount} MB is below the minimum of {min} MB")]
    AmountBelowMinimum { min: i64, amount: i64 },

    #[error("Invalid destination: {0}")]
    InvalidDestination(#[from] MsisdnError),

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(#[from] KeyError),
}

/// Transfer error types
///
/// `code()` and `http_status()` give stable values for API responses.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Provider rejected request ({code}): {reason}")]
    ProviderApplicationError { code: String, reason: String },

    #[error("Provider unreachable: {0}")]
    ProviderTransportFault(String),

    #[error("Reconciliation exhausted for transfer {0}; awaiting manual review")]
    ReconciliationExhausted(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Too many transfer requests")]
    RateLimited,
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(ValidationError::AmountBelowMinimum { .. }) => {
                "AMOUNT_TOO_SMALL"
            }
            TransferError::Validation(ValidationError::InvalidDestination(_)) => {
                "INVALID_DESTINATION"
            }
            TransferError::Validation(ValidationError::InvalidKey(_)) => "INVALID_IDEMPOTENCY_KEY",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_BALANCE",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::ProviderApplicationError { .. } => "PROVIDER_REJECTED",
            TransferError::ProviderTransportFault(_) => "PROVIDER_UNAVAILABLE",
            TransferError::ReconciliationExhausted(_) => "RECONCILIATION_EXHAUSTED",
            TransferError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::RateLimited => "RATE_LIMITED",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Validation(_) => 400,
            TransferError::AccountNotFound(_) | TransferError::TransferNotFound(_) => 404,
            TransferError::InvalidStateTransition(_) => 409,
            TransferError::InsufficientFunds { .. }
            | TransferError::ProviderApplicationError { .. } => 422,
            TransferError::RateLimited => 429,
            TransferError::ReconciliationExhausted(_) => 202,
            TransferError::ProviderTransportFault(_) => 502,
            TransferError::StoreUnavailable(_) => 503,
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                available,
                requested,
            } => TransferError::InsufficientFunds {
                available,
                requested,
            },
            LedgerError::AccountNotFound(account) => TransferError::AccountNotFound(account),
            LedgerError::StoreUnavailable(msg) => TransferError::StoreUnavailable(msg),
            other => TransferError::InvalidStateTransition(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: TransferError = ValidationError::AmountBelowMinimum { min: 50, amount: 10 }.into();
        assert_eq!(err.code(), "AMOUNT_TOO_SMALL");
        assert_eq!(err.http_status(), 400);
        assert_eq!(TransferError::RateLimited.code(), "RATE_LIMITED");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::RateLimited.http_status(), 429);
        assert_eq!(
            TransferError::TransferNotFound("k".into()).http_status(),
            404
        );
        assert_eq!(
            TransferError::StoreUnavailable("down".into()).http_status(),
            503
        );
        assert_eq!(
            TransferError::ProviderTransportFault("timeout".into()).http_status(),
            502
        );
    }

    #[test]
    fn test_from_ledger_error() {
        let err: TransferError = LedgerError::InsufficientFunds {
            available: 100,
            requested: 400,
        }
        .into();
        assert!(matches!(
            err,
            TransferError::InsufficientFunds {
                available: 100,
                requested: 400
            }
        ));

        let err: TransferError = LedgerError::StoreUnavailable("io".into()).into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_display() {
        let err = TransferError::ProviderApplicationError {
            code: "319".into(),
            reason: "No balance".into(),
        };
        assert_eq!(err.to_string(), "Provider rejected request (319): No balance");
    }
}
