//! Balance Ledger
//!
//! Authoritative MB balance per account plus the append-only entry log that
//! proves it.
//!
//! # Invariants
//!
//! 1. **Provenance**: `balance == sum(entries.amount)` for every account.
//! 2. **Non-negative**: no interleaving of concurrent operations ever makes a
//!    balance negative. `try_debit` is the only way a balance goes down and
//!    it checks and mutates in one indivisible step.
//! 3. **Holds**: `available = balance - sum(holds)`. A hold reserves funds for
//!    an in-flight transfer without touching the balance; debits without a
//!    hold can only spend `available`.
//! 4. **Idempotency**: `(correlation_id, kind)` is unique. Re-applying a
//!    credit or debit with the same pair returns the original entry.
//!
//! `StoreUnavailable` means the outcome is unknown. Callers look the entry up
//! with [`LedgerStore::find_entry`] before retrying.

pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;
pub use types::{AccountId, EntryId, EntryKind, LedgerEntry, LedgerError};

use async_trait::async_trait;

/// Ledger storage backend
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the account with a zero balance (no-op if it exists)
    async fn open_account(&self, account: AccountId) -> Result<(), LedgerError>;

    /// Append a positive entry and raise the balance atomically
    async fn credit(
        &self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        correlation_id: Option<&str>,
    ) -> Result<EntryId, LedgerError>;

    /// Check-and-debit in one step
    ///
    /// If `correlation_id` owns a hold on this account the hold is consumed
    /// by the same step and its amount counts toward what can be spent.
    async fn try_debit(
        &self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        correlation_id: Option<&str>,
    ) -> Result<EntryId, LedgerError>;

    /// Reserve `amount` of the available balance for `correlation_id`
    ///
    /// Idempotent: an existing hold for the same correlation succeeds.
    async fn reserve(
        &self,
        account: AccountId,
        amount: i64,
        correlation_id: &str,
    ) -> Result<(), LedgerError>;

    /// Drop a hold. Returns `false` if there was none.
    async fn release(&self, account: AccountId, correlation_id: &str)
    -> Result<bool, LedgerError>;

    /// Append a zero-amount audit entry (balance unchanged)
    async fn record_noop(
        &self,
        account: AccountId,
        kind: EntryKind,
        correlation_id: &str,
    ) -> Result<EntryId, LedgerError>;

    /// Point-in-time balance. Advisory only: never a precondition for a debit.
    async fn balance_of(&self, account: AccountId) -> Result<i64, LedgerError>;

    /// Balance minus active holds
    async fn available_of(&self, account: AccountId) -> Result<i64, LedgerError>;

    async fn find_entry(
        &self,
        correlation_id: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, LedgerError>;

    /// All entries for an account in append order
    async fn entries_for(&self, account: AccountId) -> Result<Vec<LedgerEntry>, LedgerError>;
}
