//! Saga Core Types
//!
//! Type definitions for the transfer saga aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::risk::ChallengeType;

use super::step::{SagaStep, TxStatus};

/// Transfer ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed (no machine_id)
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Transfer routing kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum TransferKind {
    /// Both accounts live in our ledger
    Internal = 1,
    /// Receiver is at another bank, settled over the rail
    External = 2,
}

impl TransferKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferKind::Internal),
            2 => Some(TransferKind::External),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Internal => "INTERNAL",
            TransferKind::External => "EXTERNAL",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation result from money-movement collaborators.
#[derive(Debug, Clone)]
pub enum OpResult {
    /// Operation completed successfully
    Success,
    /// Operation failed with explicit error (safe to compensate)
    Failed(String),
    /// Operation state unknown (timeout, network error) - must retry
    Pending,
}

impl OpResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, OpResult::Success)
    }

    /// Explicit failure - the side effect did NOT happen, compensation is safe.
    #[inline]
    pub fn is_explicit_fail(&self) -> bool {
        matches!(self, OpResult::Failed(_))
    }

    /// Unknown outcome - must retry, NOT safe to compensate.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, OpResult::Pending)
    }
}

/// A transfer order after API-level validation.
///
/// Challenge flows park this in the pending store; nothing durable exists
/// until the saga materializes it.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender_user_id: Uuid,
    pub sender_account_id: String,
    pub receiver_account_id: String,
    /// None or the home code means internal
    pub receiver_bank_code: Option<String>,
    pub amount: Decimal,
    pub description: Option<String>,
    /// Context signals for risk scoring
    pub device_fingerprint: Option<String>,
    pub location: Option<String>,
}

/// Saga aggregate row stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Unique transfer ID (ULID, also the DB primary key)
    pub tx_id: TransferId,
    /// Correlation key for every externally observable side effect
    pub idempotency_key: Uuid,
    pub sender_user_id: Uuid,
    pub sender_account_id: String,
    pub receiver_account_id: String,
    pub receiver_bank_code: Option<String>,
    pub kind: TransferKind,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: TxStatus,
    pub step: SagaStep,
    /// Step at which the saga failed, if it did
    pub failure_step: Option<SagaStep>,
    pub failure_reason: Option<String>,
    /// Settlement gateway reference (external path)
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a fresh aggregate in STARTED for a validated request.
    pub fn from_request(req: &TransferRequest, kind: TransferKind, fee: Decimal) -> Self {
        let now = Utc::now();
        Self {
            tx_id: TransferId::new(),
            idempotency_key: Uuid::new_v4(),
            sender_user_id: req.sender_user_id,
            sender_account_id: req.sender_account_id.clone(),
            receiver_account_id: req.receiver_account_id.clone(),
            receiver_bank_code: req.receiver_bank_code.clone(),
            kind,
            amount: req.amount,
            fee,
            status: TxStatus::Pending,
            step: SagaStep::Started,
            failure_step: None,
            failure_reason: None,
            external_ref: None,
            description: req.description.clone(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Total the sender must cover.
    pub fn total_debit(&self) -> Decimal {
        self.amount + self.fee
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tx[{}] {} -> {} amount={} fee={} kind={} step={}",
            self.tx_id,
            self.sender_account_id,
            self.receiver_account_id,
            self.amount,
            self.fee,
            self.kind,
            self.step
        )
    }
}

/// What the caller gets back from `create_transfer`.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    /// Low risk - money moved synchronously (or settlement is in flight)
    Accepted(Transaction),
    /// Step-up authentication required before anything durable happens
    ChallengeRequired(ChallengeDescriptor),
}

/// Challenge descriptor returned to the caller.
#[derive(Debug, Clone)]
pub struct ChallengeDescriptor {
    pub challenge_id: Uuid,
    pub challenge_type: ChallengeType,
    /// Human guidance ("Enter the code sent to your phone", fallback notes)
    pub guidance: String,
    pub expiry_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    fn request() -> TransferRequest {
        TransferRequest {
            sender_user_id: Uuid::new_v4(),
            sender_account_id: "acc-123".to_string(),
            receiver_account_id: "acc-456".to_string(),
            receiver_bank_code: None,
            amount: Decimal::from_str("100.00").unwrap(),
            description: Some("rent".to_string()),
            device_fingerprint: Some("device-123".to_string()),
            location: None,
        }
    }

    #[test]
    fn test_transfer_id_roundtrip() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_transfer_id_unique() {
        assert_ne!(TransferId::new(), TransferId::new());
    }

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(TransferKind::from_id(1), Some(TransferKind::Internal));
        assert_eq!(TransferKind::from_id(2), Some(TransferKind::External));
        assert_eq!(TransferKind::from_id(0), None);
    }

    #[test]
    fn test_op_result() {
        assert!(OpResult::Success.is_success());
        assert!(!OpResult::Success.is_explicit_fail());
        assert!(!OpResult::Success.is_pending());

        let fail = OpResult::Failed("test".to_string());
        assert!(!fail.is_success());
        assert!(fail.is_explicit_fail());

        assert!(OpResult::Pending.is_pending());
        assert!(!OpResult::Pending.is_explicit_fail());
    }

    #[test]
    fn test_transaction_from_request() {
        let req = request();
        let tx = Transaction::from_request(&req, TransferKind::Internal, Decimal::ZERO);

        assert_eq!(tx.step, SagaStep::Started);
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.sender_account_id, "acc-123");
        assert_eq!(tx.retry_count, 0);
        assert!(tx.failure_reason.is_none());
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn test_total_debit_includes_fee() {
        let req = request();
        let fee = Decimal::from_str("5.00").unwrap();
        let tx = Transaction::from_request(&req, TransferKind::External, fee);
        assert_eq!(tx.total_debit(), Decimal::from_str("105.00").unwrap());
    }
}
