//! Transfer audit trail.
//!
//! Append-only record of every attempt, written on its own connection so
//! the row survives even when the transfer it describes rolls back.
//! Best-effort by contract: audit failures are logged and swallowed,
//! never propagated into the primary flow.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::saga::TransferId;

/// Outcome being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Transfer accepted, saga in flight
    Pending,
    /// Step-up challenge issued, nothing durable yet
    ChallengeIssued,
    /// Transfer completed
    Completed,
    /// Rejected before any money moved (validation / business rule / challenge)
    Rejected,
    /// Saga failed after acceptance
    Failed,
    /// Sender refunded after a failed transfer
    RolledBack,
    /// Refund itself failed - manual intervention
    RollbackFailed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Pending => "PENDING",
            AuditOutcome::ChallengeIssued => "CHALLENGE_ISSUED",
            AuditOutcome::Completed => "COMPLETED",
            AuditOutcome::Rejected => "REJECTED",
            AuditOutcome::Failed => "FAILED",
            AuditOutcome::RolledBack => "ROLLED_BACK",
            AuditOutcome::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

/// One audit record. Everything optional that may not exist yet at the
/// time of writing (rejections have no transaction row).
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub tx_id: Option<TransferId>,
    pub user_id: Uuid,
    pub sender_account_id: String,
    pub receiver_account_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
}

/// Audit writer. Without a pool it degrades to structured logging, which
/// is what simulation mode and the scenario tests run.
pub struct AuditLog {
    pool: Option<PgPool>,
}

impl AuditLog {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool }
    }

    /// Write one entry. Never fails; errors are logged at warn.
    pub async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            tx_id = entry.tx_id.map(|id| id.to_string()),
            user_id = %entry.user_id,
            outcome = entry.outcome.as_str(),
            amount = %entry.amount,
            detail = entry.detail.as_deref(),
            "[audit] transfer attempt"
        );

        let Some(pool) = &self.pool else {
            return;
        };

        // Dedicated connection: the insert commits on its own, independent
        // of whatever transaction the caller is in.
        let mut conn = match pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Audit write skipped: no connection");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO transfer_audit_tb
                (tx_id, user_id, sender_account_id, receiver_account_id,
                 amount, fee, outcome, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.tx_id.map(|id| id.to_string()))
        .bind(entry.user_id)
        .bind(&entry.sender_account_id)
        .bind(&entry.receiver_account_id)
        .bind(entry.amount)
        .bind(entry.fee)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Audit write failed (swallowed)");
        }
    }
}
