//! Transfer endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use validator::Validate;

use crate::challenge::ChallengeProof;
use crate::saga::{TransferId, TransferOutcome, TransferRequest};

use super::super::state::{AppState, caller_id};
use super::super::types::{
    ApiError, ApiResponse, ApiResult, CreateTransferData, CreateTransferRequest,
    ResendChallengeRequest, TransferData, VerifyChallengeRequest, ok,
};

/// Create a transfer.
///
/// Depending on the risk assessment the response carries either the
/// accepted transfer or a challenge to complete first.
#[utoipa::path(
    post,
    path = "/api/v1/transfers",
    request_body = CreateTransferRequest,
    responses(
        (status = 200, description = "Transfer accepted or challenge issued", body = ApiResponse<CreateTransferData>),
        (status = 400, description = "Validation or business-rule rejection"),
        (status = 401, description = "Missing caller identity")
    ),
    tag = "Transfers"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTransferRequest>,
) -> ApiResult<CreateTransferData> {
    let user_id = caller_id(&headers)?;
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let request = TransferRequest {
        sender_user_id: user_id,
        sender_account_id: req.sender_account_id,
        receiver_account_id: req.receiver_account_id,
        receiver_bank_code: req.receiver_bank_code,
        amount: req.amount,
        description: req.description,
        device_fingerprint: req.device_fingerprint,
        location: req.location,
    };

    match state.saga.create_transfer(request).await? {
        TransferOutcome::Accepted(tx) => ok(CreateTransferData::accepted(&tx)),
        TransferOutcome::ChallengeRequired(descriptor) => {
            ok(CreateTransferData::challenge_required(&descriptor))
        }
    }
}

/// Complete a challenge and run the parked transfer.
#[utoipa::path(
    post,
    path = "/api/v1/transfers/verify",
    request_body = VerifyChallengeRequest,
    responses(
        (status = 200, description = "Challenge passed, transfer executed", body = ApiResponse<TransferData>),
        (status = 400, description = "Wrong code or malformed proof"),
        (status = 403, description = "Attempts exhausted or challenge rejected"),
        (status = 404, description = "Challenge not found or expired")
    ),
    tag = "Transfers"
)]
pub async fn verify_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyChallengeRequest>,
) -> ApiResult<TransferData> {
    caller_id(&headers)?;
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let proof = match (req.code, req.signature) {
        (Some(code), None) => ChallengeProof::Code(code),
        (None, Some(signature)) => ChallengeProof::Signature {
            signature,
            approved: req.approved.unwrap_or(true),
        },
        _ => {
            return ApiError::bad_request("Provide exactly one of code or signature").into_err();
        }
    };

    let tx = state.saga.verify_challenge(req.challenge_id, proof).await?;
    ok(TransferData::from(&tx))
}

/// Resend the SMS code for a pending challenge.
#[utoipa::path(
    post,
    path = "/api/v1/transfers/resend",
    request_body = ResendChallengeRequest,
    responses(
        (status = 200, description = "Code resent"),
        (status = 404, description = "Challenge not found or expired"),
        (status = 429, description = "Resend cooldown active")
    ),
    tag = "Transfers"
)]
pub async fn resend_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ResendChallengeRequest>,
) -> ApiResult<()> {
    caller_id(&headers)?;
    state.saga.resend_challenge(req.challenge_id).await?;
    ok(())
}

/// Fetch one of the caller's transfers.
#[utoipa::path(
    get,
    path = "/api/v1/transfers/{tx_id}",
    params(("tx_id" = String, Path, description = "Transfer ID (ULID)")),
    responses(
        (status = 200, description = "Transfer", body = ApiResponse<TransferData>),
        (status = 403, description = "Transfer belongs to another user"),
        (status = 404, description = "Transfer not found")
    ),
    tag = "Transfers"
)]
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tx_id): Path<String>,
) -> ApiResult<TransferData> {
    let user_id = caller_id(&headers)?;
    let tx_id: TransferId = tx_id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid transfer ID format"))?;

    let tx = state.saga.get_transfer(tx_id, user_id).await?;
    ok(TransferData::from(&tx))
}
