//! Transaction persistence with outbox coupling.
//!
//! Every step change is a compare-and-swap on the current step, and the
//! outbox events describing the change are inserted in the same database
//! transaction. A losing CAS inserts nothing: concurrent workers cannot
//! double-apply a step or double-enqueue its events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::outbox::store::insert_event;
use crate::outbox::{MemOutboxStore, NewOutboxEvent};

use super::step::{SagaStep, TxStatus};
use super::types::{Transaction, TransferId, TransferKind};

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Transaction not found: {0}")]
    NotFound(TransferId),

    #[error("Invalid stored state: {0}")]
    CorruptState(String),
}

/// One CAS step change plus everything that must commit with it.
#[derive(Debug)]
pub struct StepTransition {
    pub expected: SagaStep,
    pub to: SagaStep,
    pub status: Option<TxStatus>,
    pub failure_step: Option<SagaStep>,
    pub failure_reason: Option<String>,
    pub external_ref: Option<String>,
    pub completed: bool,
    pub events: Vec<NewOutboxEvent>,
}

impl StepTransition {
    pub fn new(expected: SagaStep, to: SagaStep) -> Self {
        Self {
            expected,
            to,
            status: None,
            failure_step: None,
            failure_reason: None,
            external_ref: None,
            completed: false,
            events: Vec::new(),
        }
    }

    pub fn status(mut self, status: TxStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Record where and why the saga failed.
    pub fn failure(mut self, at: SagaStep, reason: impl Into<String>) -> Self {
        self.failure_step = Some(at);
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn external_ref(mut self, reference: impl Into<String>) -> Self {
        self.external_ref = Some(reference.into());
        self
    }

    /// Stamp completed_at on success.
    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    pub fn event(mut self, event: NewOutboxEvent) -> Self {
        self.events.push(event);
        self
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a fresh aggregate plus its initial events, atomically.
    async fn insert(
        &self,
        tx: &Transaction,
        events: Vec<NewOutboxEvent>,
    ) -> Result<(), SagaError>;

    async fn get(&self, tx_id: TransferId) -> Result<Option<Transaction>, SagaError>;

    async fn get_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<Transaction>, SagaError>;

    /// Apply a CAS transition. Returns false (and writes nothing, events
    /// included) when the stored step is not `expected`.
    async fn transition(
        &self,
        tx_id: TransferId,
        transition: StepTransition,
    ) -> Result<bool, SagaError>;

    /// Non-terminal sagas untouched since `cutoff`, oldest first. The
    /// timeout sweep resumes these.
    async fn stalled(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transaction>, SagaError>;
}

// === PostgreSQL ===

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_tx(row: &sqlx::postgres::PgRow) -> Result<Transaction, SagaError> {
        let tx_id: String = row.get("tx_id");
        let tx_id: TransferId = tx_id
            .parse()
            .map_err(|_| SagaError::CorruptState(format!("Bad tx_id: {}", tx_id)))?;

        let kind_id: i16 = row.get("kind");
        let kind = TransferKind::from_id(kind_id)
            .ok_or_else(|| SagaError::CorruptState(format!("Bad kind: {}", kind_id)))?;

        let status_id: i16 = row.get("status");
        let status = TxStatus::from_id(status_id)
            .ok_or_else(|| SagaError::CorruptState(format!("Bad status: {}", status_id)))?;

        let step_id: i16 = row.get("step");
        let step = SagaStep::from_id(step_id)
            .ok_or_else(|| SagaError::CorruptState(format!("Bad step: {}", step_id)))?;

        let failure_step: Option<i16> = row.get("failure_step");
        let failure_step = failure_step.and_then(SagaStep::from_id);

        Ok(Transaction {
            tx_id,
            idempotency_key: row.get("idempotency_key"),
            sender_user_id: row.get("sender_user_id"),
            sender_account_id: row.get("sender_account_id"),
            receiver_account_id: row.get("receiver_account_id"),
            receiver_bank_code: row.get("receiver_bank_code"),
            kind,
            amount: row.get("amount"),
            fee: row.get("fee"),
            status,
            step,
            failure_step,
            failure_reason: row.get("failure_reason"),
            external_ref: row.get("external_ref"),
            description: row.get("description"),
            retry_count: row.get("retry_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

const TX_COLUMNS: &str = "tx_id, idempotency_key, sender_user_id, sender_account_id, \
     receiver_account_id, receiver_bank_code, kind, amount, fee, status, step, \
     failure_step, failure_reason, external_ref, description, retry_count, \
     created_at, updated_at, completed_at";

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(
        &self,
        tx: &Transaction,
        events: Vec<NewOutboxEvent>,
    ) -> Result<(), SagaError> {
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transactions_tb
                (tx_id, idempotency_key, sender_user_id, sender_account_id,
                 receiver_account_id, receiver_bank_code, kind, amount, fee,
                 status, step, description, retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            "#,
        )
        .bind(tx.tx_id.to_string())
        .bind(tx.idempotency_key)
        .bind(tx.sender_user_id)
        .bind(&tx.sender_account_id)
        .bind(&tx.receiver_account_id)
        .bind(&tx.receiver_bank_code)
        .bind(tx.kind.id())
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(tx.status.id())
        .bind(tx.step.id())
        .bind(&tx.description)
        .bind(tx.retry_count)
        .bind(tx.created_at)
        .execute(&mut *db_tx)
        .await?;

        for event in &events {
            insert_event(&mut *db_tx, event).await?;
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn get(&self, tx_id: TransferId) -> Result<Option<Transaction>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM transactions_tb WHERE tx_id = $1"
        ))
        .bind(tx_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_tx).transpose()
    }

    async fn get_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<Transaction>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM transactions_tb WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_tx).transpose()
    }

    async fn transition(
        &self,
        tx_id: TransferId,
        transition: StepTransition,
    ) -> Result<bool, SagaError> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transactions_tb
            SET step = $1,
                status = COALESCE($2, status),
                failure_step = COALESCE($3, failure_step),
                failure_reason = COALESCE($4, failure_reason),
                external_ref = COALESCE($5, external_ref),
                completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE tx_id = $7 AND step = $8
            "#,
        )
        .bind(transition.to.id())
        .bind(transition.status.map(|s| s.id()))
        .bind(transition.failure_step.map(|s| s.id()))
        .bind(&transition.failure_reason)
        .bind(&transition.external_ref)
        .bind(transition.completed)
        .bind(tx_id.to_string())
        .bind(transition.expected.id())
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(false);
        }

        for event in &transition.events {
            insert_event(&mut *db_tx, event).await?;
        }

        db_tx.commit().await?;
        Ok(true)
    }

    async fn stalled(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transaction>, SagaError> {
        let resumable: Vec<i16> = SagaStep::RESUMABLE.iter().map(SagaStep::id).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TX_COLUMNS} FROM transactions_tb
            WHERE step = ANY($1)
              AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(&resumable)
        .bind(cutoff)
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_tx).collect()
    }
}

// === In-memory ===

/// In-memory store for simulation mode and tests. Shares the outbox so
/// the atomic step-plus-event coupling is observable.
pub struct MemTransactionStore {
    transactions: Mutex<HashMap<String, Transaction>>,
    outbox: Arc<MemOutboxStore>,
}

impl MemTransactionStore {
    pub fn new(outbox: Arc<MemOutboxStore>) -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            outbox,
        }
    }
}

#[async_trait]
impl TransactionStore for MemTransactionStore {
    async fn insert(
        &self,
        tx: &Transaction,
        events: Vec<NewOutboxEvent>,
    ) -> Result<(), SagaError> {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.tx_id.to_string(), tx.clone());
        for event in events {
            self.outbox.push(event);
        }
        Ok(())
    }

    async fn get(&self, tx_id: TransferId) -> Result<Option<Transaction>, SagaError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(&tx_id.to_string())
            .cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<Transaction>, SagaError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .find(|t| t.idempotency_key == key)
            .cloned())
    }

    async fn transition(
        &self,
        tx_id: TransferId,
        transition: StepTransition,
    ) -> Result<bool, SagaError> {
        let mut transactions = self.transactions.lock().unwrap();
        let Some(tx) = transactions.get_mut(&tx_id.to_string()) else {
            return Ok(false);
        };
        if tx.step != transition.expected {
            return Ok(false);
        }

        tx.step = transition.to;
        if let Some(status) = transition.status {
            tx.status = status;
        }
        if transition.failure_step.is_some() {
            tx.failure_step = transition.failure_step;
        }
        if transition.failure_reason.is_some() {
            tx.failure_reason = transition.failure_reason;
        }
        if transition.external_ref.is_some() {
            tx.external_ref = transition.external_ref;
        }
        let now = Utc::now();
        if transition.completed {
            tx.completed_at = Some(now);
        }
        tx.updated_at = now;

        for event in transition.events {
            self.outbox.push(event);
        }
        Ok(true)
    }

    async fn stalled(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transaction>, SagaError> {
        let transactions = self.transactions.lock().unwrap();
        let mut stalled: Vec<Transaction> = transactions
            .values()
            .filter(|t| SagaStep::RESUMABLE.contains(&t.step) && t.updated_at < cutoff)
            .cloned()
            .collect();
        stalled.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stalled.truncate(batch.max(0) as usize);
        Ok(stalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::event::event_types;
    use crate::saga::types::TransferRequest;
    use rust_decimal::Decimal;

    fn store() -> (MemTransactionStore, Arc<MemOutboxStore>) {
        let outbox = Arc::new(MemOutboxStore::new());
        (MemTransactionStore::new(outbox.clone()), outbox)
    }

    fn transaction() -> Transaction {
        let req = TransferRequest {
            sender_user_id: Uuid::new_v4(),
            sender_account_id: "acc-a".to_string(),
            receiver_account_id: "acc-b".to_string(),
            receiver_bank_code: None,
            amount: Decimal::new(100, 0),
            description: None,
            device_fingerprint: None,
            location: None,
        };
        Transaction::from_request(&req, TransferKind::Internal, Decimal::ZERO)
    }

    #[tokio::test]
    async fn test_cas_rejects_wrong_expected_step() {
        let (store, _) = store();
        let tx = transaction();
        store.insert(&tx, vec![]).await.unwrap();

        // Wrong expected step: nothing changes
        let lost = store
            .transition(
                tx.tx_id,
                StepTransition::new(SagaStep::OtpVerified, SagaStep::DebitCompleted),
            )
            .await
            .unwrap();
        assert!(!lost);

        let won = store
            .transition(
                tx.tx_id,
                StepTransition::new(SagaStep::Started, SagaStep::OtpVerified),
            )
            .await
            .unwrap();
        assert!(won);

        let stored = store.get(tx.tx_id).await.unwrap().unwrap();
        assert_eq!(stored.step, SagaStep::OtpVerified);
    }

    #[tokio::test]
    async fn test_losing_cas_writes_no_events() {
        let (store, outbox) = store();
        let tx = transaction();
        store.insert(&tx, vec![]).await.unwrap();

        let transition = StepTransition::new(SagaStep::DebitCompleted, SagaStep::CreditCompleted)
            .event(NewOutboxEvent::transfer_completed(&tx));
        assert!(!store.transition(tx.tx_id, transition).await.unwrap());
        assert!(outbox.all().is_empty());

        let transition = StepTransition::new(SagaStep::Started, SagaStep::OtpVerified)
            .event(NewOutboxEvent::transfer_initiated(&tx));
        assert!(store.transition(tx.tx_id, transition).await.unwrap());
        let events = outbox.all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::TRANSFER_INITIATED);
    }

    #[tokio::test]
    async fn test_failure_fields_and_completion_stamp() {
        let (store, _) = store();
        let tx = transaction();
        store.insert(&tx, vec![]).await.unwrap();

        let transition = StepTransition::new(SagaStep::Started, SagaStep::Failed)
            .status(TxStatus::Failed)
            .failure(SagaStep::Started, "INSUFFICIENT_FUNDS");
        assert!(store.transition(tx.tx_id, transition).await.unwrap());

        let stored = store.get(tx.tx_id).await.unwrap().unwrap();
        assert_eq!(stored.step, SagaStep::Failed);
        assert_eq!(stored.status, TxStatus::Failed);
        assert_eq!(stored.failure_step, Some(SagaStep::Started));
        assert_eq!(stored.failure_reason.as_deref(), Some("INSUFFICIENT_FUNDS"));
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_idempotency_key() {
        let (store, _) = store();
        let tx = transaction();
        store.insert(&tx, vec![]).await.unwrap();

        let found = store
            .get_by_idempotency_key(tx.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tx_id, tx.tx_id);
        assert!(
            store
                .get_by_idempotency_key(Uuid::new_v4())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_stalled_excludes_terminal_and_fresh() {
        let (store, _) = store();
        let tx = transaction();
        store.insert(&tx, vec![]).await.unwrap();

        // Fresh row is not stalled
        let cutoff = Utc::now() - chrono::Duration::minutes(30);
        assert!(store.stalled(cutoff, 10).await.unwrap().is_empty());

        // Anything older than the cutoff shows up
        let future_cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.stalled(future_cutoff, 10).await.unwrap().len(), 1);

        // Terminal rows never show up
        store
            .transition(
                tx.tx_id,
                StepTransition::new(SagaStep::Started, SagaStep::Failed).status(TxStatus::Failed),
            )
            .await
            .unwrap();
        let future_cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert!(store.stalled(future_cutoff, 10).await.unwrap().is_empty());
    }

    /// A crash after the CAS into EXTERNAL_COMPLETED or EXTERNAL_FAILED must
    /// leave a row the sweep can still find, or the completion (or refund)
    /// is never re-driven.
    #[tokio::test]
    async fn test_stalled_picks_up_settlement_outcome_steps() {
        let (store, _) = store();
        let future_cutoff = Utc::now() + chrono::Duration::seconds(1);

        for (parked_step, path) in [
            (SagaStep::ExternalCompleted, SagaStep::ExternalInitiated),
            (SagaStep::ExternalFailed, SagaStep::ExternalInitiated),
        ] {
            let mut tx = transaction();
            tx.step = path;
            store.insert(&tx, vec![]).await.unwrap();
            store
                .transition(tx.tx_id, StepTransition::new(path, parked_step))
                .await
                .unwrap();

            let found = store.stalled(future_cutoff, 10).await.unwrap();
            assert!(
                found.iter().any(|t| t.tx_id == tx.tx_id && t.step == parked_step),
                "row parked at {parked_step} not returned by stalled scan"
            );
        }
    }
}
