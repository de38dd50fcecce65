//! Transfer Orchestrator
//!
//! Drives a transfer through the FSM. This is the only component that
//! talks to both the ledger and the settlement gateway.
//!
//! Every provider call is preceded by a persisted state (persist-before-call)
//! and every state change is a CAS, so a crash or a concurrent worker can
//! never cause a second provider call or a second debit for one key.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::{TransferError, ValidationError};
use super::state::TransferState;
use super::store::TransferStore;
use super::types::{Resolution, StateUpdate, TransferRecord, TransferRequest, TransferView};
use crate::config::{AppConfig, ReconciliationConfig, TransferConfig};
use crate::idempotency::{IdempotencyKey, IdempotencyKeyFactory};
use crate::ledger::{AccountId, EntryKind, LedgerError, LedgerStore};
use crate::msisdn::{Msisdn, PhoneNormalizer};
use crate::provider::{
    BalanceInfo, ProviderAdapter, ProviderOutcome, ResponseCategory, TransferReceipt,
};
use crate::rate_limit::RequestCounter;

const REASON_INSUFFICIENT: &str = "Insufficient balance";
const REASON_ACCOUNT_NOT_FOUND: &str = "Account not found";
const REASON_INTERRUPTED: &str = "Interrupted before provider call";
const REASON_NOT_EXECUTED: &str = "Transfer not executed by provider";

/// Upper bound on transitions `drive` will chain in one go
const MAX_DRIVE_STEPS: usize = 8;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reason stored on a transfer that failed before reaching the provider
fn failure_reason(e: &TransferError) -> String {
    match e {
        TransferError::Validation(v) => v.to_string(),
        TransferError::InsufficientFunds { .. } => REASON_INSUFFICIENT.to_string(),
        TransferError::AccountNotFound(_) => REASON_ACCOUNT_NOT_FOUND.to_string(),
        other => other.to_string(),
    }
}

/// Transfer Orchestrator - owns the transfer lifecycle
pub struct TransferOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    store: Arc<dyn TransferStore>,
    provider: Arc<dyn ProviderAdapter>,
    normalizer: PhoneNormalizer,
    keys: IdempotencyKeyFactory,
    limiter: RequestCounter,
    transfer: TransferConfig,
    reconciliation: ReconciliationConfig,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        store: Arc<dyn TransferStore>,
        provider: Arc<dyn ProviderAdapter>,
        config: &AppConfig,
    ) -> Result<Self, TransferError> {
        let keys = IdempotencyKeyFactory::new(config.transfer.key_prefix.clone())
            .map_err(ValidationError::from)?;

        Ok(Self {
            ledger,
            store,
            provider,
            normalizer: PhoneNormalizer::new(&config.msisdn),
            keys,
            limiter: RequestCounter::new(&config.rate_limit),
            transfer: config.transfer.clone(),
            reconciliation: config.reconciliation.clone(),
        })
    }

    /// Submit a transfer and wait (bounded) for its outcome
    ///
    /// The state machine runs on its own task: if the wait expires the
    /// caller gets `Pending` with the key while the provider call carries on.
    /// Re-submitting an existing key returns that transfer's current view
    /// without touching the provider.
    pub async fn submit(
        self: &Arc<Self>,
        req: TransferRequest,
    ) -> Result<TransferView, TransferError> {
        if let Some(key) = &req.idempotency_key
            && let Some(existing) = self.store.get(key).await?
        {
            return Self::existing_view(req.account_id, key, existing);
        }

        if !self.limiter.try_acquire(&req.account_id.to_string()) {
            warn!(account = req.account_id, "Transfer submission rate limited");
            return Err(TransferError::RateLimited);
        }

        let key = req
            .idempotency_key
            .clone()
            .unwrap_or_else(|| self.keys.generate());
        let account_id = req.account_id;
        let record = TransferRecord::new(key.clone(), account_id, req.destination, req.amount_mb);

        let (stored, created) = self.store.insert_if_absent(record).await?;
        if !created {
            return Self::existing_view(account_id, &key, stored);
        }
        info!(
            transfer_key = %key,
            account = stored.account_id,
            amount_mb = stored.amount_mb,
            "Transfer requested"
        );

        let this = Arc::clone(self);
        let drive_key = key.clone();
        let handle = tokio::spawn(async move { this.drive(&drive_key).await });

        match tokio::time::timeout(self.transfer.submit_wait(), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(transfer_key = %key, error = %join_err, "Transfer task aborted");
                self.status(&key).await
            }
            Err(_) => {
                info!(transfer_key = %key, "Outcome not known within submit wait - returning pending");
                Ok(TransferView::Pending { key })
            }
        }
    }

    /// View of a transfer found under a re-submitted key
    ///
    /// A key owned by another account is reported as unknown.
    fn existing_view(
        account_id: AccountId,
        key: &IdempotencyKey,
        existing: TransferRecord,
    ) -> Result<TransferView, TransferError> {
        if existing.account_id != account_id {
            warn!(
                transfer_key = %key,
                account = account_id,
                owner = existing.account_id,
                "Idempotency key belongs to another account"
            );
            return Err(TransferError::TransferNotFound(key.to_string()));
        }
        debug!(transfer_key = %key, state = %existing.state, "Duplicate key - returning existing transfer");
        Ok(existing.view())
    }

    /// Chain steps until the transfer settles or parks
    async fn drive(&self, key: &IdempotencyKey) -> Result<TransferView, TransferError> {
        for _ in 0..MAX_DRIVE_STEPS {
            let state = self.step(key).await?;
            let progressing = matches!(
                state,
                TransferState::Requested
                    | TransferState::ProviderAccepted
                    | TransferState::ProviderRejected
            );
            if !progressing {
                break;
            }
        }
        self.status(key).await
    }

    /// Execute one step of the FSM
    ///
    /// Returns the state after processing. Transfers that are in flight in
    /// another task (Reserved, Reconciling), parked for an operator, or
    /// settled are returned unchanged.
    pub async fn step(&self, key: &IdempotencyKey) -> Result<TransferState, TransferError> {
        let record = self.load(key).await?;

        match record.state {
            TransferState::Requested => self.step_requested(&record).await,
            TransferState::ProviderAccepted => self.step_accepted(&record).await,
            TransferState::ProviderRejected => self.step_rejected(&record).await,
            TransferState::ProviderUnknown => {
                if record.next_reconcile_at.is_some_and(|t| t > now_millis()) {
                    Ok(record.state)
                } else {
                    self.reconcile_record(&record, false).await
                }
            }
            _ => Ok(record.state),
        }
    }

    /// Step from Requested: validate, hold, persist Reserved, call provider
    async fn step_requested(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;

        let destination = match self.validate(record).await {
            Ok(destination) => destination,
            Err(e @ TransferError::StoreUnavailable(_)) => return Err(e),
            Err(e) => return self.fail_requested(record, failure_reason(&e)).await,
        };

        // The hold is the real funds check; the one in validate is advisory
        if let Err(e) = self
            .ledger
            .reserve(record.account_id, record.amount_mb, key.as_str())
            .await
        {
            let e = TransferError::from(e);
            if let TransferError::StoreUnavailable(_) = e {
                return Err(e);
            }
            return self.fail_requested(record, failure_reason(&e)).await;
        }

        // 1. Persist Reserved BEFORE calling the provider
        let update = StateUpdate {
            destination: Some(destination.clone()),
            ..Default::default()
        };
        if !self
            .store
            .transition(key, TransferState::Requested, TransferState::Reserved, update)
            .await?
        {
            let current = self.load(key).await?;
            if current.state == TransferState::Failed {
                // Abandoned by recovery while we were reserving
                self.ledger.release(record.account_id, key.as_str()).await?;
            }
            return Ok(current.state);
        }

        info!(
            transfer_key = %key,
            destination = %destination,
            amount_mb = record.amount_mb,
            "Funds reserved - calling provider"
        );

        // 2. Call provider
        let outcome = self
            .provider
            .send_transfer(key, &destination, record.amount_mb)
            .await;

        // 3. Handle result
        self.apply_send_outcome(record, outcome).await
    }

    async fn validate(&self, record: &TransferRecord) -> Result<Msisdn, TransferError> {
        if record.amount_mb < self.transfer.min_amount {
            return Err(ValidationError::AmountBelowMinimum {
                min: self.transfer.min_amount,
                amount: record.amount_mb,
            }
            .into());
        }

        let destination = self
            .normalizer
            .normalize(&record.destination_raw)
            .map_err(ValidationError::from)?;

        let balance = self.ledger.balance_of(record.account_id).await?;
        if balance < record.amount_mb {
            return Err(TransferError::InsufficientFunds {
                available: balance,
                requested: record.amount_mb,
            });
        }

        Ok(destination)
    }

    async fn fail_requested(
        &self,
        record: &TransferRecord,
        reason: String,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;
        if self
            .store
            .transition(
                key,
                TransferState::Requested,
                TransferState::Failed,
                StateUpdate::reason(reason.clone()),
            )
            .await?
        {
            info!(transfer_key = %key, reason = %reason, "Transfer failed before provider call");
            return Ok(TransferState::Failed);
        }
        Ok(self.load(key).await?.state)
    }

    async fn apply_send_outcome(
        &self,
        record: &TransferRecord,
        outcome: ProviderOutcome<TransferReceipt>,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;

        match outcome {
            ProviderOutcome::Success(receipt) => {
                let refs =
                    StateUpdate::references(receipt.provider_ref, receipt.provider_txn_ref);
                // Recovery may have parked a slow call as unknown meanwhile
                let mut accepted = false;
                for from in [
                    TransferState::Reserved,
                    TransferState::ProviderUnknown,
                    TransferState::Reconciling,
                ] {
                    if self
                        .store
                        .transition(key, from, TransferState::ProviderAccepted, refs.clone())
                        .await?
                    {
                        accepted = true;
                        break;
                    }
                }
                let current = self.load(key).await?;
                if !accepted {
                    return self.escalate_late_success(&current, refs).await;
                }
                self.step_accepted(&current).await
            }
            ProviderOutcome::ApplicationError(rejection) => {
                warn!(
                    transfer_key = %key,
                    code = %rejection.code,
                    category = %rejection.category,
                    message = %rejection.message,
                    "Provider rejected transfer"
                );
                if !self
                    .store
                    .transition(
                        key,
                        TransferState::Reserved,
                        TransferState::ProviderRejected,
                        StateUpdate::reason(rejection.reason()),
                    )
                    .await?
                {
                    return Ok(self.load(key).await?.state);
                }
                let current = self.load(key).await?;
                self.step_rejected(&current).await
            }
            ProviderOutcome::TransportFault(fault) => {
                // Unknown outcome - MUST NOT release the hold
                warn!(
                    transfer_key = %key,
                    error = %fault,
                    "Provider outcome unknown - parking for reconciliation"
                );
                let grace = self.reconciliation.grace_period_secs as i64 * 1_000;
                let update = StateUpdate {
                    failure_reason: Some(fault.to_string()),
                    reconcile_attempts: Some(0),
                    next_reconcile_at: Some(now_millis() + grace),
                    ..Default::default()
                };
                self.store
                    .transition(
                        key,
                        TransferState::Reserved,
                        TransferState::ProviderUnknown,
                        update,
                    )
                    .await?;
                Ok(self.load(key).await?.state)
            }
        }
    }

    /// The gateway executed a transfer we had already settled otherwise
    async fn escalate_late_success(
        &self,
        record: &TransferRecord,
        refs: StateUpdate,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;
        if matches!(
            record.state,
            TransferState::ProviderAccepted | TransferState::Completed | TransferState::ManualReview
        ) {
            return Ok(record.state);
        }

        error!(
            transfer_key = %key,
            account = record.account_id,
            amount_mb = record.amount_mb,
            state = %record.state,
            provider_txn_ref = refs.provider_txn_ref.as_deref().unwrap_or_default(),
            "ACCOUNTING ANOMALY: provider executed transfer after it was settled as {}",
            record.state
        );
        let update = StateUpdate {
            failure_reason: Some(format!(
                "Provider executed transfer after it was marked {}",
                record.state
            )),
            ..refs
        };
        self.store
            .transition(key, record.state, TransferState::ManualReview, update)
            .await?;
        Ok(self.load(key).await?.state)
    }

    /// Step from ProviderAccepted: apply the (idempotent) debit
    async fn step_accepted(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;

        match self
            .ledger
            .try_debit(
                record.account_id,
                record.amount_mb,
                EntryKind::TransferSent,
                Some(key.as_str()),
            )
            .await
        {
            Ok(entry_id) => {
                if self
                    .store
                    .update_state_if(key, TransferState::ProviderAccepted, TransferState::Completed)
                    .await?
                {
                    info!(
                        transfer_key = %key,
                        entry_id = %entry_id,
                        provider_ref = record.provider_ref.as_deref().unwrap_or_default(),
                        "Transfer completed"
                    );
                }
                Ok(self.load(key).await?.state)
            }
            Err(LedgerError::StoreUnavailable(msg)) => {
                // Stay in ProviderAccepted; the debit is re-applied idempotently
                warn!(transfer_key = %key, error = %msg, "Debit outcome unknown (will retry)");
                Err(TransferError::StoreUnavailable(msg))
            }
            Err(e) => {
                error!(
                    transfer_key = %key,
                    account = record.account_id,
                    amount_mb = record.amount_mb,
                    error = %e,
                    "ACCOUNTING ANOMALY: provider executed transfer but debit failed"
                );
                self.store
                    .transition(
                        key,
                        TransferState::ProviderAccepted,
                        TransferState::ManualReview,
                        StateUpdate::reason(format!("Debit failed after provider success: {}", e)),
                    )
                    .await?;
                Ok(self.load(key).await?.state)
            }
        }
    }

    /// Step from ProviderRejected: release the hold
    async fn step_rejected(
        &self,
        record: &TransferRecord,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;

        self.ledger.release(record.account_id, key.as_str()).await?;
        if self
            .store
            .update_state_if(key, TransferState::ProviderRejected, TransferState::Failed)
            .await?
        {
            info!(
                transfer_key = %key,
                reason = record.failure_reason.as_deref().unwrap_or_default(),
                "Transfer failed - hold released"
            );
        }
        Ok(self.load(key).await?.state)
    }

    /// One status check for a ProviderUnknown transfer
    ///
    /// `snapshot` may be stale (a batch read earlier by this or another
    /// worker); attempts and the due time are taken from the record as it
    /// stands once the CAS is won. `force` skips the due-time check.
    pub(crate) async fn reconcile_record(
        &self,
        snapshot: &TransferRecord,
        force: bool,
    ) -> Result<TransferState, TransferError> {
        let key = &snapshot.idempotency_key;

        // Only one reconciler per transfer
        if !self
            .store
            .update_state_if(key, TransferState::ProviderUnknown, TransferState::Reconciling)
            .await?
        {
            return Ok(self.load(key).await?.state);
        }

        let record = self.load(key).await?;
        if !force && record.next_reconcile_at.is_some_and(|t| t > now_millis()) {
            debug!(transfer_key = %key, "Status check not due yet - skipping");
            self.store
                .update_state_if(key, TransferState::Reconciling, TransferState::ProviderUnknown)
                .await?;
            return Ok(self.load(key).await?.state);
        }
        let record = &record;

        let attempt = record.reconcile_attempts + 1;
        debug!(transfer_key = %key, attempt, "Checking provider status");

        match self.provider.check_status(key).await {
            ProviderOutcome::Success(report) => {
                if let Some(amount) = report.amount_mb
                    && amount != record.amount_mb
                {
                    error!(
                        transfer_key = %key,
                        expected_mb = record.amount_mb,
                        reported_mb = amount,
                        "Provider reports a different amount"
                    );
                    let mut update = StateUpdate::references(
                        report.provider_ref,
                        report.provider_txn_ref,
                    );
                    update.failure_reason = Some(format!(
                        "Provider reports {} MB, expected {} MB",
                        amount, record.amount_mb
                    ));
                    self.store
                        .transition(
                            key,
                            TransferState::Reconciling,
                            TransferState::ManualReview,
                            update,
                        )
                        .await?;
                    return Ok(self.load(key).await?.state);
                }

                info!(transfer_key = %key, attempt, "Reconciled: provider executed transfer");
                self.store
                    .transition(
                        key,
                        TransferState::Reconciling,
                        TransferState::ProviderAccepted,
                        StateUpdate::references(report.provider_ref, report.provider_txn_ref),
                    )
                    .await?;
                let current = self.load(key).await?;
                self.step_accepted(&current).await
            }
            ProviderOutcome::ApplicationError(rejection)
                if rejection.category == ResponseCategory::TransactionNotFound =>
            {
                // A late send success may have taken the transfer meanwhile
                if self
                    .store
                    .transition(
                        key,
                        TransferState::Reconciling,
                        TransferState::Failed,
                        StateUpdate::reason(REASON_NOT_EXECUTED),
                    )
                    .await?
                {
                    self.ledger.release(record.account_id, key.as_str()).await?;
                    self.ledger
                        .record_noop(record.account_id, EntryKind::TransferFailedNoop, key.as_str())
                        .await?;
                    info!(transfer_key = %key, attempt, "Reconciled: provider has no such transfer");
                }
                Ok(self.load(key).await?.state)
            }
            ProviderOutcome::ApplicationError(rejection) => {
                let cause = format!(
                    "Status check rejected ({}): {}",
                    rejection.code, rejection.message
                );
                self.retry_later(record, attempt, cause).await
            }
            ProviderOutcome::TransportFault(fault) => {
                self.retry_later(record, attempt, fault.to_string()).await
            }
        }
    }

    /// Still unknown: back off, or escalate once attempts run out
    async fn retry_later(
        &self,
        record: &TransferRecord,
        attempt: u32,
        cause: String,
    ) -> Result<TransferState, TransferError> {
        let key = &record.idempotency_key;

        if attempt >= self.reconciliation.max_attempts {
            warn!(
                transfer_key = %key,
                attempts = attempt,
                cause = %cause,
                "Reconciliation exhausted - escalating to manual review"
            );
            let update = StateUpdate {
                failure_reason: Some(format!(
                    "Reconciliation exhausted after {} attempts: {}",
                    attempt, cause
                )),
                reconcile_attempts: Some(attempt),
                ..Default::default()
            };
            self.store
                .transition(
                    key,
                    TransferState::Reconciling,
                    TransferState::ManualReview,
                    update,
                )
                .await?;
        } else {
            let delay = self.reconciliation.backoff(attempt - 1);
            debug!(
                transfer_key = %key,
                attempt,
                retry_in_secs = delay.as_secs(),
                cause = %cause,
                "Provider outcome still unknown"
            );
            let update = StateUpdate {
                failure_reason: Some(cause),
                reconcile_attempts: Some(attempt),
                next_reconcile_at: Some(now_millis() + delay.as_millis() as i64),
                ..Default::default()
            };
            self.store
                .transition(
                    key,
                    TransferState::Reconciling,
                    TransferState::ProviderUnknown,
                    update,
                )
                .await?;
        }
        Ok(self.load(key).await?.state)
    }

    /// Resume a transfer a crashed process left behind
    ///
    /// Unlike `step`, this treats in-flight states as abandoned: a stale
    /// Reserved transfer may or may not have reached the provider, so it is
    /// handed to reconciliation rather than called again.
    pub async fn recover(&self, key: &IdempotencyKey) -> Result<TransferState, TransferError> {
        let record = self.load(key).await?;
        let now = now_millis();

        match record.state {
            TransferState::Requested => {
                let state = self
                    .fail_requested(&record, REASON_INTERRUPTED.to_string())
                    .await?;
                if state == TransferState::Failed {
                    self.ledger.release(record.account_id, key.as_str()).await?;
                }
                Ok(state)
            }
            TransferState::Reserved => {
                warn!(transfer_key = %key, "Stale reserved transfer - presuming provider outcome unknown");
                let update = StateUpdate {
                    failure_reason: Some("Interrupted during provider call".to_string()),
                    next_reconcile_at: Some(now),
                    ..Default::default()
                };
                self.store
                    .transition(
                        key,
                        TransferState::Reserved,
                        TransferState::ProviderUnknown,
                        update,
                    )
                    .await?;
                Ok(self.load(key).await?.state)
            }
            TransferState::Reconciling => {
                warn!(transfer_key = %key, "Stale reconciliation - returning to unknown");
                let update = StateUpdate {
                    next_reconcile_at: Some(now),
                    ..Default::default()
                };
                self.store
                    .transition(
                        key,
                        TransferState::Reconciling,
                        TransferState::ProviderUnknown,
                        update,
                    )
                    .await?;
                Ok(self.load(key).await?.state)
            }
            _ => self.step(key).await,
        }
    }

    /// Current caller-visible view
    pub async fn status(&self, key: &IdempotencyKey) -> Result<TransferView, TransferError> {
        Ok(self.load(key).await?.view())
    }

    /// Force one status check for an unknown transfer, then report
    pub async fn check_status(
        &self,
        key: &IdempotencyKey,
    ) -> Result<TransferView, TransferError> {
        let record = self.load(key).await?;
        match record.state {
            TransferState::ProviderUnknown => {
                self.reconcile_record(&record, true).await?;
            }
            TransferState::ManualReview => {
                return Err(TransferError::ReconciliationExhausted(key.to_string()));
            }
            _ => {}
        }
        self.status(key).await
    }

    /// Status-check every unknown transfer that is due; returns how many settled
    pub async fn reconcile_due(&self, limit: usize) -> Result<usize, TransferError> {
        let due = self
            .store
            .find_due_for_reconcile(now_millis(), limit)
            .await?;

        let mut settled = 0;
        for record in &due {
            match self.reconcile_record(record, false).await {
                Ok(state) if state.is_terminal() => settled += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(transfer_key = %record.idempotency_key, error = %e, "Reconciliation failed");
                }
            }
        }
        Ok(settled)
    }

    /// Recover transfers stuck longer than the stale threshold; returns how many moved
    pub async fn recover_stale(
        &self,
        threshold: std::time::Duration,
        limit: usize,
    ) -> Result<usize, TransferError> {
        let stale = self.store.find_stale(threshold, limit).await?;

        let mut moved = 0;
        for record in &stale {
            debug!(transfer_key = %record.idempotency_key, state = %record.state, "Recovering transfer");
            match self.recover(&record.idempotency_key).await {
                Ok(state) if state != record.state => {
                    info!(
                        transfer_key = %record.idempotency_key,
                        old_state = %record.state,
                        new_state = %state,
                        "Transfer state advanced"
                    );
                    moved += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(transfer_key = %record.idempotency_key, error = %e, "Failed to recover transfer");
                }
            }
        }
        Ok(moved)
    }

    /// Transfers waiting for an operator, oldest first
    pub async fn manual_review_queue(
        &self,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .list_by_state(TransferState::ManualReview, limit)
            .await
    }

    /// Operator decision for a transfer in manual review
    pub async fn resolve_manually(
        &self,
        key: &IdempotencyKey,
        resolution: Resolution,
    ) -> Result<TransferView, TransferError> {
        let record = self.load(key).await?;
        if record.state != TransferState::ManualReview {
            return Err(TransferError::InvalidStateTransition(format!(
                "{} is {}, not MANUAL_REVIEW",
                key, record.state
            )));
        }

        let applied = match resolution {
            Resolution::Completed {
                provider_ref,
                provider_txn_ref,
            } => {
                self.ledger
                    .try_debit(
                        record.account_id,
                        record.amount_mb,
                        EntryKind::TransferSent,
                        Some(key.as_str()),
                    )
                    .await?;
                self.store
                    .transition(
                        key,
                        TransferState::ManualReview,
                        TransferState::Completed,
                        StateUpdate::references(provider_ref, provider_txn_ref),
                    )
                    .await?
            }
            Resolution::Failed { reason } => {
                self.ledger.release(record.account_id, key.as_str()).await?;
                self.ledger
                    .record_noop(record.account_id, EntryKind::TransferFailedNoop, key.as_str())
                    .await?;
                self.store
                    .transition(
                        key,
                        TransferState::ManualReview,
                        TransferState::Failed,
                        StateUpdate::reason(reason),
                    )
                    .await?
            }
        };

        if !applied {
            return Err(TransferError::InvalidStateTransition(format!(
                "{} was resolved concurrently",
                key
            )));
        }
        info!(transfer_key = %key, "Transfer resolved by operator");
        self.status(key).await
    }

    /// Dealer wallet balance at the gateway
    pub async fn provider_balance(&self) -> Result<BalanceInfo, TransferError> {
        match self.provider.check_balance().await {
            ProviderOutcome::Success(info) => Ok(info),
            ProviderOutcome::ApplicationError(rejection) => {
                Err(TransferError::ProviderApplicationError {
                    reason: rejection.reason(),
                    code: rejection.code,
                })
            }
            ProviderOutcome::TransportFault(fault) => {
                Err(TransferError::ProviderTransportFault(fault.to_string()))
            }
        }
    }

    /// Drop expired rate-limit windows
    pub fn purge_rate_limits(&self) {
        self.limiter.purge_expired();
    }

    /// Full transfer record
    pub async fn get(&self, key: &IdempotencyKey) -> Result<TransferRecord, TransferError> {
        self.load(key).await
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    async fn load(&self, key: &IdempotencyKey) -> Result<TransferRecord, TransferError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(key.to_string()))
    }
}
