//! API boundary types.
//!
//! - [`ApiResponse<T>`]: unified response wrapper
//! - [`ApiError`]: handler error with HTTP status and stable error code
//! - request DTOs with validation, response DTOs with OpenAPI schemas

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::challenge::ChallengeError;
use crate::device::{DeviceError, UserDevice};
use crate::risk::ChallengeType;
use crate::saga::{ChallengeDescriptor, Transaction, TransferError};
use crate::settlement::SettlementStatus;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper.
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Standard API error codes.
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_FUNDS: i32 = 1002;
    pub const LIMIT_EXCEEDED: i32 = 1003;
    pub const UNKNOWN_BANK: i32 = 1004;
    pub const ACCOUNT_LOCKED: i32 = 1005;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const NOT_OWNER: i32 = 2003;

    // Resource / challenge errors (4xxx)
    pub const CHALLENGE_NOT_FOUND: i32 = 4001;
    pub const INVALID_OTP: i32 = 4002;
    pub const ATTEMPTS_EXHAUSTED: i32 = 4003;
    pub const CHALLENGE_REJECTED: i32 = 4004;
    pub const DUPLICATE_DEVICE: i32 = 4005;
    pub const TRANSFER_NOT_FOUND: i32 = 4040;
    pub const RATE_LIMITED: i32 = 4291;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

/// Handler error: HTTP status plus a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            error_codes::MISSING_AUTH,
            "Missing or malformed X-User-Id header",
        )
    }

    pub fn not_found(code: i32, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.code,
            msg: self.msg,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        use error_codes::*;
        let msg = e.to_string();
        match e {
            TransferError::InvalidRequest(_) => {
                Self::new(StatusCode::BAD_REQUEST, INVALID_PARAMETER, msg)
            }
            TransferError::UnknownBank(_) => Self::new(StatusCode::BAD_REQUEST, UNKNOWN_BANK, msg),
            TransferError::AccountNotFound(_) => {
                Self::new(StatusCode::BAD_REQUEST, INVALID_PARAMETER, msg)
            }
            TransferError::NotOwner => Self::new(StatusCode::FORBIDDEN, NOT_OWNER, msg),
            TransferError::AccountLocked => {
                Self::new(StatusCode::BAD_REQUEST, ACCOUNT_LOCKED, msg)
            }
            TransferError::InsufficientFunds => {
                Self::new(StatusCode::BAD_REQUEST, INSUFFICIENT_FUNDS, msg)
            }
            TransferError::LimitExceeded(_) => {
                Self::new(StatusCode::BAD_REQUEST, LIMIT_EXCEEDED, msg)
            }
            TransferError::Challenge(c) => c.into(),
            TransferError::TransferNotFound => {
                Self::new(StatusCode::NOT_FOUND, TRANSFER_NOT_FOUND, msg)
            }
            TransferError::ServiceUnavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE, msg)
            }
            TransferError::Saga(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, msg),
        }
    }
}

impl From<ChallengeError> for ApiError {
    fn from(e: ChallengeError) -> Self {
        use error_codes::*;
        let msg = e.to_string();
        match e {
            ChallengeError::NotFound => Self::new(StatusCode::NOT_FOUND, CHALLENGE_NOT_FOUND, msg),
            ChallengeError::InvalidOtp { .. } => {
                Self::new(StatusCode::BAD_REQUEST, INVALID_OTP, msg)
            }
            ChallengeError::AttemptsExhausted => {
                Self::new(StatusCode::FORBIDDEN, ATTEMPTS_EXHAUSTED, msg)
            }
            ChallengeError::Rejected | ChallengeError::InvalidSignature => {
                Self::new(StatusCode::FORBIDDEN, CHALLENGE_REJECTED, msg)
            }
            ChallengeError::CooldownActive => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED, msg)
            }
            ChallengeError::WrongProofKind => {
                Self::new(StatusCode::BAD_REQUEST, INVALID_PARAMETER, msg)
            }
            ChallengeError::DispatchFailed(_) | ChallengeError::Device(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE, msg)
            }
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(e: DeviceError) -> Self {
        use error_codes::*;
        let msg = e.to_string();
        match e {
            DeviceError::DuplicateDevice => {
                Self::new(StatusCode::CONFLICT, DUPLICATE_DEVICE, msg)
            }
            DeviceError::InvalidPublicKey => {
                Self::new(StatusCode::BAD_REQUEST, INVALID_PARAMETER, msg)
            }
            DeviceError::DeviceNotFound(_) | DeviceError::ChallengeNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, CHALLENGE_NOT_FOUND, msg)
            }
            DeviceError::NotOwner => Self::new(StatusCode::FORBIDDEN, NOT_OWNER, msg),
            DeviceError::DatabaseError(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, msg)
            }
        }
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Create-transfer request body.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTransferRequest {
    /// Source account, must belong to the caller
    #[validate(length(min = 1, max = 64))]
    pub sender_account_id: String,
    /// Destination account
    #[validate(length(min = 1, max = 64))]
    pub receiver_account_id: String,
    /// Destination bank code; omit for same-bank transfers
    #[validate(length(min = 2, max = 16))]
    pub receiver_bank_code: Option<String>,
    /// Transfer amount, decimal string
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    #[validate(length(max = 255))]
    pub description: Option<String>,
    /// Client device fingerprint, scored by the risk engine
    #[validate(length(max = 128))]
    pub device_fingerprint: Option<String>,
    /// Coarse client location, scored by the risk engine
    #[validate(length(max = 128))]
    pub location: Option<String>,
}

/// Challenge verification request. Exactly one proof kind applies:
/// `code` for SMS OTP, `signature` (+ `approved`) for Smart-OTP.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyChallengeRequest {
    pub challenge_id: Uuid,
    /// 6-digit SMS code
    #[validate(length(min = 6, max = 6))]
    pub code: Option<String>,
    /// Hex-encoded Ed25519 signature over the challenge nonce
    #[validate(length(min = 2, max = 256))]
    pub signature: Option<String>,
    /// On-device decision; defaults to approved when a signature is sent
    pub approved: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResendChallengeRequest {
    pub challenge_id: Uuid,
}

/// Device enrollment request body.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 1, max = 128))]
    pub fingerprint: String,
    #[validate(length(max = 64))]
    pub device_name: Option<String>,
    /// Hex-encoded Ed25519 public key (64 hex chars)
    #[validate(length(min = 64, max = 64))]
    pub public_key: String,
    #[validate(length(max = 255))]
    pub push_token: Option<String>,
    #[serde(default)]
    pub biometric_enabled: bool,
}

/// Settlement rail callback body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SettlementCallbackRequest {
    /// The idempotency key the settlement order was submitted under
    pub idempotency_key: Uuid,
    pub status: SettlementStatus,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// One transfer, as exposed over the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransferData {
    #[schema(example = "01JF6ZHVY8X4R2Q0B3TJ6M9WSD")]
    pub tx_id: String,
    pub kind: String,
    pub status: String,
    pub step: String,
    pub sender_account_id: String,
    pub receiver_account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_bank_code: Option<String>,
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    #[schema(value_type = String, example = "5.00")]
    pub fee: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for TransferData {
    fn from(tx: &Transaction) -> Self {
        Self {
            tx_id: tx.tx_id.to_string(),
            kind: tx.kind.as_str().to_string(),
            status: tx.status.as_str().to_string(),
            step: tx.step.as_str().to_string(),
            sender_account_id: tx.sender_account_id.clone(),
            receiver_account_id: tx.receiver_account_id.clone(),
            receiver_bank_code: tx.receiver_bank_code.clone(),
            amount: tx.amount,
            fee: tx.fee,
            external_ref: tx.external_ref.clone(),
            failure_reason: tx.failure_reason.clone(),
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}

/// Step-up challenge returned instead of a transfer.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeData {
    pub challenge_id: Uuid,
    pub challenge_type: ChallengeType,
    #[schema(example = "Enter the code sent to your registered phone")]
    pub guidance: String,
    pub expiry_seconds: u64,
}

impl From<&ChallengeDescriptor> for ChallengeData {
    fn from(d: &ChallengeDescriptor) -> Self {
        Self {
            challenge_id: d.challenge_id,
            challenge_type: d.challenge_type,
            guidance: d.guidance.clone(),
            expiry_seconds: d.expiry_seconds,
        }
    }
}

/// Create-transfer outcome: either the transfer itself or a challenge
/// the caller must complete first.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateTransferData {
    #[schema(example = "ACCEPTED")]
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeData>,
}

impl CreateTransferData {
    pub fn accepted(tx: &Transaction) -> Self {
        Self {
            result: "ACCEPTED",
            transfer: Some(tx.into()),
            challenge: None,
        }
    }

    pub fn challenge_required(d: &ChallengeDescriptor) -> Self {
        Self {
            result: "CHALLENGE_REQUIRED",
            transfer: None,
            challenge: Some(d.into()),
        }
    }
}

/// One enrolled device. The public key never leaves the server.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceData {
    pub device_id: Uuid,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub trusted: bool,
    pub biometric_enabled: bool,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&UserDevice> for DeviceData {
    fn from(d: &UserDevice) -> Self {
        Self {
            device_id: d.device_id,
            fingerprint: d.fingerprint.clone(),
            device_name: d.device_name.clone(),
            trusted: d.trusted,
            biometric_enabled: d.biometric_enabled,
            revoked: d.revoked,
            last_used_at: d.last_used_at,
            created_at: d.created_at,
        }
    }
}

/// One registered counterparty bank.
#[derive(Debug, Serialize, ToSchema)]
pub struct BankData {
    #[schema(example = "VCB")]
    pub code: String,
    #[schema(example = "Vietcombank")]
    pub display_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BankListData {
    /// Code of this bank; transfers to it stay on the internal ledger
    pub home_code: String,
    pub external: Vec<BankData>,
}
