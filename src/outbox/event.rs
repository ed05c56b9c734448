//! Outbox event types and the domain event catalog.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::fmt;
use uuid::Uuid;

use crate::saga::Transaction;

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum EventStatus {
    /// Written, waiting for the sweep
    Pending = 0,
    /// Claimed by a sweep pass (soft lock, first writer wins)
    Processing = 10,
    /// Published to the bus - never republished
    Completed = 20,
    /// Publish failed; retried until the cap, then flagged for remediation
    Failed = -10,
}

impl EventStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(EventStatus::Pending),
            10 => Some(EventStatus::Processing),
            20 => Some(EventStatus::Completed),
            -10 => Some(EventStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processing => "PROCESSING",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event type names as they appear on the wire.
pub mod event_types {
    pub const TRANSFER_INITIATED: &str = "TransferInitiated";
    pub const OTP_GENERATED: &str = "OtpGenerated";
    pub const TRANSFER_COMPLETED: &str = "TransferCompleted";
    pub const TRANSFER_FAILED: &str = "TransferFailed";
    pub const SETTLEMENT_REQUESTED: &str = "SettlementRequested";
    pub const REFUND_COMPLETED: &str = "RefundCompleted";
}

/// Bus destinations: exchange + routing key per concern.
pub mod destinations {
    pub const TRANSFER_EXCHANGE: &str = "bank.transfers";
    pub const SETTLEMENT_EXCHANGE: &str = "bank.settlement";
    pub const NOTIFICATION_EXCHANGE: &str = "bank.notifications";

    pub const RK_TRANSFER_INITIATED: &str = "transfer.initiated";
    pub const RK_TRANSFER_COMPLETED: &str = "transfer.completed";
    pub const RK_TRANSFER_FAILED: &str = "transfer.failed";
    pub const RK_TRANSFER_REFUNDED: &str = "transfer.refunded";
    pub const RK_SETTLEMENT_REQUESTED: &str = "settlement.requested";
    pub const RK_OTP_GENERATED: &str = "notify.otp";
}

/// An event about to be enqueued, before the store assigns bookkeeping.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: &'static str,
    pub aggregate_id: String,
    pub event_type: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
    pub payload: Value,
}

impl NewOutboxEvent {
    fn tx_payload(tx: &Transaction) -> Value {
        json!({
            "tx_id": tx.tx_id.to_string(),
            "idempotency_key": tx.idempotency_key,
            "sender_account_id": tx.sender_account_id,
            "receiver_account_id": tx.receiver_account_id,
            "receiver_bank_code": tx.receiver_bank_code,
            "kind": tx.kind.as_str(),
            "amount": tx.amount,
            "fee": tx.fee,
            "step": tx.step.as_str(),
        })
    }

    pub fn transfer_initiated(tx: &Transaction) -> Self {
        Self {
            aggregate_type: "transaction",
            aggregate_id: tx.tx_id.to_string(),
            event_type: event_types::TRANSFER_INITIATED,
            exchange: destinations::TRANSFER_EXCHANGE,
            routing_key: destinations::RK_TRANSFER_INITIATED,
            payload: Self::tx_payload(tx),
        }
    }

    pub fn transfer_completed(tx: &Transaction) -> Self {
        Self {
            aggregate_type: "transaction",
            aggregate_id: tx.tx_id.to_string(),
            event_type: event_types::TRANSFER_COMPLETED,
            exchange: destinations::TRANSFER_EXCHANGE,
            routing_key: destinations::RK_TRANSFER_COMPLETED,
            payload: Self::tx_payload(tx),
        }
    }

    pub fn transfer_failed(tx: &Transaction, reason: &str) -> Self {
        let mut payload = Self::tx_payload(tx);
        payload["reason"] = json!(reason);
        Self {
            aggregate_type: "transaction",
            aggregate_id: tx.tx_id.to_string(),
            event_type: event_types::TRANSFER_FAILED,
            exchange: destinations::TRANSFER_EXCHANGE,
            routing_key: destinations::RK_TRANSFER_FAILED,
            payload,
        }
    }

    pub fn settlement_requested(tx: &Transaction, reference: &str) -> Self {
        let mut payload = Self::tx_payload(tx);
        payload["settlement_reference"] = json!(reference);
        Self {
            aggregate_type: "transaction",
            aggregate_id: tx.tx_id.to_string(),
            event_type: event_types::SETTLEMENT_REQUESTED,
            exchange: destinations::SETTLEMENT_EXCHANGE,
            routing_key: destinations::RK_SETTLEMENT_REQUESTED,
            payload,
        }
    }

    pub fn refund_completed(tx: &Transaction) -> Self {
        let mut payload = Self::tx_payload(tx);
        payload["refund_amount"] = json!(tx.total_debit());
        Self {
            aggregate_type: "transaction",
            aggregate_id: tx.tx_id.to_string(),
            event_type: event_types::REFUND_COMPLETED,
            exchange: destinations::TRANSFER_EXCHANGE,
            routing_key: destinations::RK_TRANSFER_REFUNDED,
            payload,
        }
    }

    /// Challenge issuance happens before any transaction row exists, so the
    /// aggregate is the challenge itself. The code never rides the bus.
    pub fn otp_generated(challenge_id: Uuid, user_id: Uuid) -> Self {
        Self {
            aggregate_type: "challenge",
            aggregate_id: challenge_id.to_string(),
            event_type: event_types::OTP_GENERATED,
            exchange: destinations::NOTIFICATION_EXCHANGE,
            routing_key: destinations::RK_OTP_GENERATED,
            payload: json!({
                "challenge_id": challenge_id,
                "user_id": user_id,
            }),
        }
    }
}

/// A stored outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Value,
    pub status: EventStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn from_new(new: NewOutboxEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_type: new.aggregate_type.to_string(),
            aggregate_id: new.aggregate_id,
            event_type: new.event_type.to_string(),
            exchange: new.exchange.to_string(),
            routing_key: new.routing_key.to_string(),
            payload: new.payload,
            status: EventStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}
