//! Balance debit/credit primitives.
//!
//! The ledger is an external collaborator: the saga talks to it through
//! [`LedgerService`] and never assumes which store backs it. Every
//! money-moving method is idempotent on the transfer id, so a retried
//! saga step cannot double-apply.

pub mod memory;
pub mod pg;

pub use memory::MemLedger;
pub use pg::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::saga::{OpResult, TransferId};

/// Well-known failure reasons carried inside [`OpResult::Failed`].
pub mod failure {
    pub const INSUFFICIENT_FUNDS: &str = "INSUFFICIENT_FUNDS";
    pub const ACCOUNT_NOT_FOUND: &str = "ACCOUNT_NOT_FOUND";
    pub const ACCOUNT_LOCKED: &str = "ACCOUNT_LOCKED";
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

/// Snapshot of one ledger account, used for pre-flight validation.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub account_id: String,
    pub owner_user_id: Uuid,
    pub balance: Decimal,
    pub locked: bool,
    pub updated_at: DateTime<Utc>,
}

/// Ledger operations the saga depends on.
///
/// All money movers MUST be idempotent on `tx_id`: calling twice with the
/// same id has the same effect as calling once. Explicit failures mean the
/// side effect did NOT happen; `Pending` means the outcome is unknown and
/// the caller must retry, never compensate.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Read one account for ownership and balance validation.
    async fn account(&self, account_id: &str) -> Result<Option<AccountInfo>, LedgerError>;

    /// Remove `amount` from the account.
    async fn debit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult;

    /// Add `amount` to the account.
    async fn credit(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult;

    /// Compensating credit after a failed transfer. Recorded under its own
    /// operation kind so it can coexist with the original debit.
    async fn refund(&self, account_id: &str, amount: Decimal, tx_id: TransferId) -> OpResult;

    /// Debit `amount + fee` from the sender and credit `amount` to the
    /// receiver in one local ACID transaction.
    async fn transfer_atomic(
        &self,
        sender_account_id: &str,
        receiver_account_id: &str,
        amount: Decimal,
        fee: Decimal,
        tx_id: TransferId,
    ) -> OpResult;
}

/// Ledger operation kinds recorded for idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Debit,
    Credit,
    Refund,
    Transfer,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::Debit => "DEBIT",
            LedgerOp::Credit => "CREDIT",
            LedgerOp::Refund => "REFUND",
            LedgerOp::Transfer => "TRANSFER",
        }
    }
}
