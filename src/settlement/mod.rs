//! Settlement rail boundary.
//!
//! External transfers leave our ledger through this seam: `initiate` hands
//! the debited amount to the interbank gateway, then the saga waits for a
//! callback or polls `query_status`. The gateway owns the authoritative
//! status; we only ever converge on what it reports.

mod client;

pub use client::HttpSettlementGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Gateway-side status of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Processing => "PROCESSING",
            SettlementStatus::Completed => "COMPLETED",
            SettlementStatus::Failed => "FAILED",
        }
    }

    /// Still in flight on the rail side.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SettlementStatus::Pending | SettlementStatus::Processing)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the gateway hands back: its reference id plus current status.
#[derive(Debug, Clone)]
pub struct SettlementTicket {
    pub reference: String,
    pub status: SettlementStatus,
}

/// Order submitted to the rail. The idempotency key makes duplicate
/// submissions converge on one settlement gateway-side.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOrder {
    pub idempotency_key: Uuid,
    pub sender_account_id: String,
    pub receiver_account_id: String,
    pub receiver_bank_code: String,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Error, Debug)]
pub enum SettlementError {
    /// Request did not complete; outcome on the rail side is unknown
    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Malformed gateway response: {0}")]
    InvalidResponse(String),
}

impl SettlementError {
    /// True when the order may have reached the rail despite the error.
    /// The saga must treat these as unknown-outcome and re-query, never
    /// refund on the strength of them.
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            SettlementError::Timeout | SettlementError::Transport(_)
        )
    }
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Submit a transfer to the rail. Idempotent on the order's key.
    async fn initiate(&self, order: &SettlementOrder) -> Result<SettlementTicket, SettlementError>;

    /// Authoritative status for a previously issued reference.
    async fn query_status(&self, reference: &str) -> Result<SettlementStatus, SettlementError>;
}

/// Simulation-mode gateway: accepts every order and reports it completed
/// on the first status poll. References are derived from the idempotency
/// key so duplicate initiations return the same ticket.
pub struct SimSettlementGateway;

#[async_trait]
impl SettlementGateway for SimSettlementGateway {
    async fn initiate(&self, order: &SettlementOrder) -> Result<SettlementTicket, SettlementError> {
        let reference = format!("SIM-{}", order.idempotency_key.simple());
        tracing::info!(
            reference,
            amount = %order.amount,
            bank = order.receiver_bank_code,
            "[sim] settlement accepted"
        );
        Ok(SettlementTicket {
            reference,
            status: SettlementStatus::Processing,
        })
    }

    async fn query_status(&self, _reference: &str) -> Result<SettlementStatus, SettlementError> {
        Ok(SettlementStatus::Completed)
    }
}
