//! In-memory ledger
//!
//! Each account's book sits behind its DashMap shard lock; every operation
//! runs its check and its mutation inside one `get_mut` section with no
//! `.await` in between, so the section is indivisible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::LedgerStore;
use super::types::{AccountId, EntryId, EntryKind, LedgerEntry, LedgerError};

#[derive(Debug, Default)]
struct AccountBook {
    balance: i64,
    /// Sum of `holds`
    held: i64,
    holds: HashMap<String, i64>,
    entries: Vec<LedgerEntry>,
}

/// Ledger kept in process memory (tests, single-instance deployments)
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<AccountId, AccountBook>,
    /// `(correlation_id, kind)` → owning account and entry
    index: DashMap<(String, EntryKind), (AccountId, EntryId)>,
    next_entry_id: AtomicI64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, correlation_id: Option<&str>, kind: EntryKind) -> Option<EntryId> {
        let correlation_id = correlation_id?;
        self.index
            .get(&(correlation_id.to_string(), kind))
            .map(|found| found.1)
    }

    /// Append to a book the caller already holds exclusively
    fn append(
        &self,
        book: &mut AccountBook,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        correlation_id: Option<&str>,
    ) -> EntryId {
        let entry_id = EntryId(self.next_entry_id.fetch_add(1, Ordering::SeqCst) + 1);
        book.entries.push(LedgerEntry {
            entry_id,
            account_id: account,
            amount,
            kind,
            correlation_id: correlation_id.map(str::to_string),
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        if let Some(c) = correlation_id {
            self.index.insert((c.to_string(), kind), (account, entry_id));
        }
        entry_id
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn open_account(&self, account: AccountId) -> Result<(), LedgerError> {
        self.accounts.entry(account).or_default();
        Ok(())
    }

    async fn credit(
        &self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        correlation_id: Option<&str>,
    ) -> Result<EntryId, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if !kind.is_credit() {
            return Err(LedgerError::WrongKind(kind));
        }

        let mut book = self
            .accounts
            .get_mut(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;

        if let Some(entry_id) = self.existing(correlation_id, kind) {
            return Ok(entry_id);
        }

        let balance = book
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        book.balance = balance;
        Ok(self.append(&mut book, account, amount, kind, correlation_id))
    }

    async fn try_debit(
        &self,
        account: AccountId,
        amount: i64,
        kind: EntryKind,
        correlation_id: Option<&str>,
    ) -> Result<EntryId, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if !kind.is_debit() {
            return Err(LedgerError::WrongKind(kind));
        }

        let mut book = self
            .accounts
            .get_mut(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;

        if let Some(entry_id) = self.existing(correlation_id, kind) {
            return Ok(entry_id);
        }

        let own_hold = correlation_id
            .and_then(|c| book.holds.get(c).copied())
            .unwrap_or(0);
        let spendable = book.balance - book.held + own_hold;
        if spendable < amount {
            return Err(LedgerError::InsufficientFunds {
                available: spendable,
                requested: amount,
            });
        }

        if let Some(c) = correlation_id
            && book.holds.remove(c).is_some()
        {
            book.held -= own_hold;
        }
        book.balance -= amount;
        Ok(self.append(&mut book, account, -amount, kind, correlation_id))
    }

    async fn reserve(
        &self,
        account: AccountId,
        amount: i64,
        correlation_id: &str,
    ) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut book = self
            .accounts
            .get_mut(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;

        if book.holds.contains_key(correlation_id) {
            return Ok(());
        }

        let available = book.balance - book.held;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        book.holds.insert(correlation_id.to_string(), amount);
        book.held += amount;
        Ok(())
    }

    async fn release(
        &self,
        account: AccountId,
        correlation_id: &str,
    ) -> Result<bool, LedgerError> {
        let mut book = self
            .accounts
            .get_mut(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;

        match book.holds.remove(correlation_id) {
            Some(amount) => {
                book.held -= amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_noop(
        &self,
        account: AccountId,
        kind: EntryKind,
        correlation_id: &str,
    ) -> Result<EntryId, LedgerError> {
        if kind.is_credit() || kind.is_debit() {
            return Err(LedgerError::WrongKind(kind));
        }

        let mut book = self
            .accounts
            .get_mut(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;

        if let Some(entry_id) = self.existing(Some(correlation_id), kind) {
            return Ok(entry_id);
        }
        Ok(self.append(&mut book, account, 0, kind, Some(correlation_id)))
    }

    async fn balance_of(&self, account: AccountId) -> Result<i64, LedgerError> {
        self.accounts
            .get(&account)
            .map(|book| book.balance)
            .ok_or(LedgerError::AccountNotFound(account))
    }

    async fn available_of(&self, account: AccountId) -> Result<i64, LedgerError> {
        self.accounts
            .get(&account)
            .map(|book| book.balance - book.held)
            .ok_or(LedgerError::AccountNotFound(account))
    }

    async fn find_entry(
        &self,
        correlation_id: &str,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        // Copy out of the index before touching the account map.
        let found = self
            .index
            .get(&(correlation_id.to_string(), kind))
            .map(|r| *r.value());

        let Some((account, entry_id)) = found else {
            return Ok(None);
        };
        Ok(self.accounts.get(&account).and_then(|book| {
            book.entries
                .iter()
                .find(|e| e.entry_id == entry_id)
                .cloned()
        }))
    }

    async fn entries_for(&self, account: AccountId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.accounts
            .get(&account)
            .map(|book| book.entries.clone())
            .ok_or(LedgerError::AccountNotFound(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn funded(balance: i64) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.open_account(1).await.unwrap();
        ledger
            .credit(1, balance, EntryKind::ProviderLoad, Some("load-1"))
            .await
            .unwrap();
        ledger
    }

    async fn assert_provenance(ledger: &InMemoryLedger, account: AccountId) {
        let entries = ledger.entries_for(account).await.unwrap();
        let sum: i64 = entries.iter().map(|e| e.amount).sum();
        assert_eq!(ledger.balance_of(account).await.unwrap(), sum);
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let ledger = funded(500).await;

        ledger
            .try_debit(1, 120, EntryKind::DataUsage, None)
            .await
            .unwrap();
        assert_eq!(ledger.balance_of(1).await.unwrap(), 380);

        let err = ledger
            .try_debit(1, 400, EntryKind::DataUsage, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: 380,
                requested: 400
            }
        );
        assert_eq!(ledger.balance_of(1).await.unwrap(), 380);
        assert_provenance(&ledger, 1).await;
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let ledger = funded(100).await;
        assert_eq!(
            ledger.credit(1, 0, EntryKind::ProviderLoad, None).await,
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            ledger.credit(1, 10, EntryKind::DataUsage, None).await,
            Err(LedgerError::WrongKind(EntryKind::DataUsage))
        );
        assert_eq!(
            ledger.try_debit(2, 10, EntryKind::DataUsage, None).await,
            Err(LedgerError::AccountNotFound(2))
        );
    }

    #[tokio::test]
    async fn test_debit_idempotent_by_correlation() {
        let ledger = funded(500).await;

        let first = ledger
            .try_debit(1, 100, EntryKind::TransferSent, Some("K1"))
            .await
            .unwrap();
        let second = ledger
            .try_debit(1, 100, EntryKind::TransferSent, Some("K1"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.balance_of(1).await.unwrap(), 400);
        let found = ledger
            .find_entry("K1", EntryKind::TransferSent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.amount, -100);
        assert_provenance(&ledger, 1).await;
    }

    #[tokio::test]
    async fn test_hold_protects_reserved_funds() {
        let ledger = funded(500).await;

        ledger.reserve(1, 400, "K1").await.unwrap();
        assert_eq!(ledger.balance_of(1).await.unwrap(), 500);
        assert_eq!(ledger.available_of(1).await.unwrap(), 100);

        // Second reservation and unheld debit cannot touch the held 400
        assert!(
            ledger
                .reserve(1, 400, "K2")
                .await
                .unwrap_err()
                .is_insufficient_funds()
        );
        assert!(
            ledger
                .try_debit(1, 200, EntryKind::DataUsage, None)
                .await
                .unwrap_err()
                .is_insufficient_funds()
        );

        // The holder's debit consumes its hold
        ledger
            .try_debit(1, 400, EntryKind::TransferSent, Some("K1"))
            .await
            .unwrap();
        assert_eq!(ledger.balance_of(1).await.unwrap(), 100);
        assert_eq!(ledger.available_of(1).await.unwrap(), 100);
        assert!(!ledger.release(1, "K1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_idempotent_and_release() {
        let ledger = funded(500).await;
        ledger.reserve(1, 300, "K1").await.unwrap();
        ledger.reserve(1, 300, "K1").await.unwrap();
        assert_eq!(ledger.available_of(1).await.unwrap(), 200);

        assert!(ledger.release(1, "K1").await.unwrap());
        assert_eq!(ledger.available_of(1).await.unwrap(), 500);
        assert!(ledger.entries_for(1).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_noop_entry_leaves_balance() {
        let ledger = funded(500).await;
        let a = ledger
            .record_noop(1, EntryKind::TransferFailedNoop, "K9")
            .await
            .unwrap();
        let b = ledger
            .record_noop(1, EntryKind::TransferFailedNoop, "K9")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(ledger.balance_of(1).await.unwrap(), 500);
        assert_eq!(ledger.entries_for(1).await.unwrap().len(), 2);
        assert!(
            ledger
                .record_noop(1, EntryKind::TransferSent, "K9")
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let ledger = Arc::new(funded(1_000).await);

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let key = format!("D{}", i);
                    ledger
                        .try_debit(1, 70, EntryKind::DataUsage, Some(key.as_str()))
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let ok = results.iter().filter(|r| r.as_ref().unwrap().is_ok()).count();

        // 1000 / 70 = 14 debits fit
        assert_eq!(ok, 14);
        assert_eq!(ledger.balance_of(1).await.unwrap(), 1_000 - 14 * 70);
        assert_provenance(&ledger, 1).await;
    }
}
