//! Transfer Database Layer
//!
//! PostgreSQL persistence for FSM transfer state (`bundle_transfers_tb`).
//! All state updates use atomic CAS (Compare-And-Swap) operations.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::error::TransferError;
use super::state::TransferState;
use super::store::TransferStore;
use super::types::{StateUpdate, TransferId, TransferRecord};
use crate::idempotency::IdempotencyKey;
use crate::ledger::AccountId;
use crate::msisdn::Msisdn;

const SELECT_COLUMNS: &str = r#"
    SELECT transfer_id, idempotency_key, account_id, destination_raw, destination,
           amount, state, failure_reason, provider_ref, provider_txn_ref,
           reconcile_attempts, next_reconcile_at, created_at, updated_at
    FROM bundle_transfers_tb
"#;

/// Transfer database operations
pub struct TransferDb {
    pool: PgPool,
}

fn to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

impl TransferDb {
    /// Create a new TransferDb with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(&self, row: &sqlx::postgres::PgRow) -> Result<TransferRecord, TransferError> {
        let transfer_id: String = row.get("transfer_id");
        let transfer_id = transfer_id
            .parse::<TransferId>()
            .map_err(|e| TransferError::StoreUnavailable(format!("Invalid transfer_id: {}", e)))?;

        let key: String = row.get("idempotency_key");
        let idempotency_key = IdempotencyKey::new(key).map_err(|e| {
            TransferError::StoreUnavailable(format!("Invalid idempotency_key: {}", e))
        })?;

        let state_id: i16 = row.get("state");
        let state = TransferState::from_id(state_id).ok_or_else(|| {
            TransferError::StoreUnavailable(format!("Invalid state: {}", state_id))
        })?;

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        let next_reconcile_at: Option<DateTime<Utc>> = row.get("next_reconcile_at");
        let destination: Option<String> = row.get("destination");
        let attempts: i32 = row.get("reconcile_attempts");

        Ok(TransferRecord {
            transfer_id,
            idempotency_key,
            account_id: row.get::<i64, _>("account_id") as AccountId,
            destination_raw: row.get("destination_raw"),
            destination: destination.map(Msisdn::from_trusted),
            amount_mb: row.get("amount"),
            state,
            failure_reason: row.get("failure_reason"),
            provider_ref: row.get("provider_ref"),
            provider_txn_ref: row.get("provider_txn_ref"),
            reconcile_attempts: attempts.max(0) as u32,
            next_reconcile_at: next_reconcile_at.map(|t| t.timestamp_millis()),
            created_at: created_at.timestamp_millis(),
            updated_at: updated_at.timestamp_millis(),
        })
    }

    async fn fetch_many(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|row| self.row_to_record(row)).collect()
    }
}

#[async_trait]
impl TransferStore for TransferDb {
    async fn insert_if_absent(
        &self,
        record: TransferRecord,
    ) -> Result<(TransferRecord, bool), TransferError> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO bundle_transfers_tb
                (transfer_id, idempotency_key, account_id, destination_raw, amount, state,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.transfer_id.to_string())
        .bind(record.idempotency_key.as_str())
        .bind(record.account_id as i64)
        .bind(&record.destination_raw)
        .bind(record.amount_mb)
        .bind(record.state.id())
        .fetch_optional(&self.pool)
        .await?;

        let created = inserted.is_some();
        if !created {
            tracing::info!(
                transfer_key = %record.idempotency_key,
                "Transfer with key already exists - returning existing record (idempotent)"
            );
        }

        let stored = self.get(&record.idempotency_key).await?.ok_or_else(|| {
            TransferError::TransferNotFound(record.idempotency_key.to_string())
        })?;
        Ok((stored, created))
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, TransferError> {
        let row = sqlx::query(&format!("{} WHERE idempotency_key = $1", SELECT_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        key: &IdempotencyKey,
        expected: TransferState,
        new_state: TransferState,
        update: StateUpdate,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"
            UPDATE bundle_transfers_tb
            SET state = $1,
                destination = COALESCE($2, destination),
                failure_reason = COALESCE($3, failure_reason),
                provider_ref = COALESCE($4, provider_ref),
                provider_txn_ref = COALESCE($5, provider_txn_ref),
                reconcile_attempts = COALESCE($6, reconcile_attempts),
                next_reconcile_at = COALESCE($7, next_reconcile_at),
                updated_at = NOW()
            WHERE idempotency_key = $8 AND state = $9
            "#,
        )
        .bind(new_state.id())
        .bind(update.destination.as_ref().map(|d| d.as_str().to_string()))
        .bind(update.failure_reason)
        .bind(update.provider_ref)
        .bind(update.provider_txn_ref)
        .bind(update.reconcile_attempts.map(|a| a as i32))
        .bind(update.next_reconcile_at.map(to_timestamp))
        .bind(key.as_str())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_due_for_reconcile(
        &self,
        now_millis: i64,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let sql = format!(
            "{} WHERE state = $1 AND (next_reconcile_at IS NULL OR next_reconcile_at <= $2) \
             ORDER BY updated_at ASC LIMIT $3",
            SELECT_COLUMNS
        );
        self.fetch_many(
            sqlx::query(&sql)
                .bind(TransferState::ProviderUnknown.id())
                .bind(to_timestamp(now_millis))
                .bind(limit as i64),
        )
        .await
    }

    /// Find stale transfers (stuck in recoverable states for too long)
    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let threshold_secs = threshold.as_secs() as i64;
        let states: Vec<i16> = TransferState::recoverable()
            .iter()
            .map(|s| s.id())
            .collect();

        let sql = format!(
            "{} WHERE state = ANY($1) AND updated_at <= NOW() - make_interval(secs => $2) \
             ORDER BY updated_at ASC LIMIT $3",
            SELECT_COLUMNS
        );
        self.fetch_many(
            sqlx::query(&sql)
                .bind(states)
                .bind(threshold_secs as f64)
                .bind(limit as i64),
        )
        .await
    }

    async fn list_by_state(
        &self,
        state: TransferState,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let sql = format!(
            "{} WHERE state = $1 ORDER BY updated_at ASC LIMIT $2",
            SELECT_COLUMNS
        );
        self.fetch_many(sqlx::query(&sql).bind(state.id()).bind(limit as i64))
            .await
    }
}
