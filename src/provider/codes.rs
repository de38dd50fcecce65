//! Gateway Response Codes
//!
//! Maps the raw code in a gateway response to a semantic category. The
//! gateway is inconsistent about numeric vs textual codes, so both are
//! accepted for failures. Only `200` means success.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The only code that means "done"
pub const SUCCESS_CODE: &str = "200";

/// What a gateway response code means to us
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCategory {
    Success,
    /// Dealer wallet upstream cannot cover the transfer
    InsufficientUpstreamBalance,
    UnknownSubscriber,
    BadRecipientAddress,
    BadCredentials,
    IneligibleProduct,
    /// Gateway-side failure; the request was not executed
    TransientFailure,
    /// Status check found no transaction under the key
    TransactionNotFound,
    Unmapped(String),
}

impl ResponseCategory {
    /// Message shown to the account holder when a transfer fails
    pub fn reason(&self) -> String {
        match self {
            ResponseCategory::Success => "Success".to_string(),
            ResponseCategory::InsufficientUpstreamBalance => "No balance".to_string(),
            ResponseCategory::UnknownSubscriber => "Unknown subscriber".to_string(),
            ResponseCategory::BadRecipientAddress => "Invalid recipient number".to_string(),
            ResponseCategory::BadCredentials => "Provider authentication failed".to_string(),
            ResponseCategory::IneligibleProduct => {
                "Recipient is not eligible for this bundle".to_string()
            }
            ResponseCategory::TransientFailure => {
                "Provider temporarily unavailable".to_string()
            }
            ResponseCategory::TransactionNotFound => "Transaction not found".to_string(),
            ResponseCategory::Unmapped(raw) => format!("Provider error {}", raw),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCategory::Success)
    }
}

impl fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCategory::Unmapped(raw) => write!(f, "UNMAPPED({})", raw),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Classify a raw response code (numeric or textual, case-insensitive)
pub fn classify(raw: &str) -> ResponseCategory {
    let code = raw.trim().to_ascii_uppercase();
    match code.as_str() {
        "200" => ResponseCategory::Success,
        "301" | "INVALID_CREDENTIALS" | "AUTH_FAILED" => ResponseCategory::BadCredentials,
        "304" | "UNKNOWN_SUBSCRIBER" | "SUBSCRIBER_NOT_FOUND" => {
            ResponseCategory::UnknownSubscriber
        }
        "308" | "INVALID_MSISDN" | "INVALID_RECIPIENT" => ResponseCategory::BadRecipientAddress,
        "319" | "NO_BALANCE" | "INSUFFICIENT_BALANCE" => {
            ResponseCategory::InsufficientUpstreamBalance
        }
        "321" | "NOT_ELIGIBLE" | "INELIGIBLE_PRODUCT" => ResponseCategory::IneligibleProduct,
        "500" | "503" | "SYSTEM_ERROR" | "SYSTEM_BUSY" => ResponseCategory::TransientFailure,
        "404" | "NOT_FOUND" | "TRANSACTION_NOT_FOUND" => ResponseCategory::TransactionNotFound,
        _ => ResponseCategory::Unmapped(raw.trim().to_string()),
    }
}
