//! Idempotency Keys
//!
//! One key per transfer attempt. The same key is sent to the gateway as the
//! transaction id and used locally as the reconciliation and ledger
//! correlation key, so it must be unique across processes.
//!
//! Format: `<prefix><yyyyMMddHHmmssSSS><seq:4><random:8>`, e.g.
//! `BDL2026101609301212300017Q4ZK2MD`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest key the gateway accepts in its transaction id field
pub const MAX_KEY_LEN: usize = 64;

const RANDOM_SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Idempotency key is empty")]
    Empty,

    #[error("Idempotency key longer than {MAX_KEY_LEN} characters")]
    TooLong,

    #[error("Idempotency key may only contain [A-Za-z0-9_-]")]
    InvalidCharacter,
}

/// Idempotency key for one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Accept a caller-supplied key (retry of an earlier attempt)
    pub fn new(value: impl Into<String>) -> Result<Self, KeyError> {
        let value = value.into();
        if value.is_empty() {
            return Err(KeyError::Empty);
        }
        if value.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong);
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KeyError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

/// Generates idempotency keys
///
/// The per-factory sequence makes keys from one factory distinct even within
/// a millisecond; the random suffix covers other processes.
#[derive(Debug)]
pub struct IdempotencyKeyFactory {
    prefix: String,
    sequence: AtomicU64,
}

impl IdempotencyKeyFactory {
    pub fn new(prefix: impl Into<String>) -> Result<Self, KeyError> {
        let prefix = prefix.into();
        // 17 timestamp + 4 sequence + random suffix
        if prefix.len() + 21 + RANDOM_SUFFIX_LEN > MAX_KEY_LEN {
            return Err(KeyError::TooLong);
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KeyError::InvalidCharacter);
        }
        Ok(Self {
            prefix,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn generate(&self) -> IdempotencyKey {
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();

        IdempotencyKey(format!("{}{}{:04}{}", self.prefix, timestamp, seq, suffix))
    }
}
