//! PostgreSQL-backed ledger.
//!
//! Each money mover runs one local ACID transaction:
//! record the operation (`ON CONFLICT DO NOTHING` - the idempotency gate),
//! lock the account rows `FOR UPDATE` in deterministic order, then apply.
//! Explicit business failures roll the transaction back so a retry gets a
//! fresh attempt; only applied effects leave an operation record.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction as PgTx};

use crate::saga::{OpResult, TransferId};

use super::{AccountInfo, LedgerError, LedgerOp, LedgerService, failure};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the operation inside the caller's transaction.
    ///
    /// Returns false if the operation was already applied (duplicate call).
    async fn record_op(
        tx: &mut PgTx<'_, Postgres>,
        tx_id: TransferId,
        op: LedgerOp,
        account_id: &str,
        amount: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_operations_tb (tx_id, op_type, account_id, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tx_id, op_type) DO NOTHING
            "#,
        )
        .bind(tx_id.to_string())
        .bind(op.as_str())
        .bind(account_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lock one account row and return (balance, locked).
    async fn lock_account(
        tx: &mut PgTx<'_, Postgres>,
        account_id: &str,
    ) -> Result<Option<(Decimal, bool)>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT balance, locked FROM accounts_tb WHERE account_id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| (r.get("balance"), r.get("locked"))))
    }

    async fn apply_delta(
        tx: &mut PgTx<'_, Postgres>,
        account_id: &str,
        delta: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts_tb SET balance = balance + $1, updated_at = NOW() WHERE account_id = $2",
        )
        .bind(delta)
        .bind(account_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Shared body for debit-shaped operations (debit with balance check).
    async fn debit_op(
        &self,
        account_id: &str,
        amount: Decimal,
        tx_id: TransferId,
        op: LedgerOp,
    ) -> Result<OpResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !Self::record_op(&mut tx, tx_id, op, account_id, amount).await? {
            tx.commit().await?;
            tracing::debug!(tx_id = %tx_id, op = op.as_str(), "Ledger op already applied (idempotent)");
            return Ok(OpResult::Success);
        }

        let Some((balance, locked)) = Self::lock_account(&mut tx, account_id).await? else {
            tx.rollback().await?;
            return Ok(OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string()));
        };
        if locked {
            tx.rollback().await?;
            return Ok(OpResult::Failed(failure::ACCOUNT_LOCKED.to_string()));
        }
        if balance < amount {
            tx.rollback().await?;
            return Ok(OpResult::Failed(failure::INSUFFICIENT_FUNDS.to_string()));
        }

        Self::apply_delta(&mut tx, account_id, -amount).await?;
        tx.commit().await?;
        Ok(OpResult::Success)
    }

    /// Shared body for credit-shaped operations (no balance check).
    async fn credit_op(
        &self,
        account_id: &str,
        amount: Decimal,
        tx_id: TransferId,
        op: LedgerOp,
    ) -> Result<OpResult, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !Self::record_op(&mut tx, tx_id, op, account_id, amount).await? {
            tx.commit().await?;
            tracing::debug!(tx_id = %tx_id, op = op.as_str(), "Ledger op already applied (idempotent)");
            return Ok(OpResult::Success);
        }

        let Some((_, locked)) = Self::lock_account(&mut tx, account_id).await? else {
            tx.rollback().await?;
            return Ok(OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string()));
        };
        if locked && op != LedgerOp::Refund {
            // Refunds land even on a locked account: money must go home.
            tx.rollback().await?;
            return Ok(OpResult::Failed(failure::ACCOUNT_LOCKED.to_string()));
        }

        Self::apply_delta(&mut tx, account_id, amount).await?;
        tx.commit().await?;
        Ok(OpResult::Success)
    }
}

/// Infra errors map to Pending: the outcome is unknown, retry is the only
/// safe move.
fn unknown(op: &'static str, e: sqlx::Error) -> OpResult {
    tracing::warn!(op, error = %e, "Ledger operation outcome unknown");
    OpResult::Pending
}

#[async_trait]
impl LedgerService for PgLedger {
    async fn account(&self, account_id: &str) -> Result<Option<AccountInfo>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT account_id, owner_user_id, balance, locked, updated_at
            FROM accounts_tb
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AccountInfo {
            account_id: r.get("account_id"),
            owner_user_id: r.get("owner_user_id"),
            balance: r.get("balance"),
            locked: r.get("locked"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn debit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        match self.debit_op(account_id, amount, tx_id, LedgerOp::Debit).await {
            Ok(r) => r,
            Err(e) => unknown("debit", e),
        }
    }

    async fn credit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        match self.credit_op(account_id, amount, tx_id, LedgerOp::Credit).await {
            Ok(r) => r,
            Err(e) => unknown("credit", e),
        }
    }

    async fn refund(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult {
        match self.credit_op(account_id, amount, tx_id, LedgerOp::Refund).await {
            Ok(r) => r,
            Err(e) => unknown("refund", e),
        }
    }

    async fn transfer_atomic(
        &self,
        sender_account_id: &str,
        receiver_account_id: &str,
        amount: Decimal,
        fee: Decimal,
        tx_id: TransferId,
    ) -> OpResult {
        let result: Result<OpResult, sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            if !Self::record_op(&mut tx, tx_id, LedgerOp::Transfer, sender_account_id, amount)
                .await?
            {
                tx.commit().await?;
                tracing::debug!(tx_id = %tx_id, "Transfer already applied (idempotent)");
                return Ok(OpResult::Success);
            }

            // Deterministic lock order prevents deadlock between two
            // opposite-direction transfers.
            let mut ids = [sender_account_id, receiver_account_id];
            ids.sort_unstable();
            for id in ids {
                if Self::lock_account(&mut tx, id).await?.is_none() {
                    tx.rollback().await?;
                    return Ok(OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string()));
                }
            }

            let Some((balance, locked)) = Self::lock_account(&mut tx, sender_account_id).await?
            else {
                tx.rollback().await?;
                return Ok(OpResult::Failed(failure::ACCOUNT_NOT_FOUND.to_string()));
            };
            if locked {
                tx.rollback().await?;
                return Ok(OpResult::Failed(failure::ACCOUNT_LOCKED.to_string()));
            }
            let total = amount + fee;
            if balance < total {
                tx.rollback().await?;
                return Ok(OpResult::Failed(failure::INSUFFICIENT_FUNDS.to_string()));
            }

            Self::apply_delta(&mut tx, sender_account_id, -total).await?;
            Self::apply_delta(&mut tx, receiver_account_id, amount).await?;
            tx.commit().await?;
            Ok(OpResult::Success)
        }
        .await;

        match result {
            Ok(r) => r,
            Err(e) => unknown("transfer_atomic", e),
        }
    }
}
