//! Settlement rail callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use tracing::info;

use super::super::state::AppState;
use super::super::types::{ApiResponse, ApiResult, SettlementCallbackRequest, TransferData, ok};

/// Settlement result callback from the interbank gateway.
///
/// Keyed by the idempotency key the order was submitted under, so
/// duplicate deliveries converge on the same terminal state.
#[utoipa::path(
    post,
    path = "/api/v1/settlements/callback",
    request_body = SettlementCallbackRequest,
    responses(
        (status = 200, description = "Callback applied (or already applied)", body = ApiResponse<TransferData>),
        (status = 404, description = "No transfer under this idempotency key")
    ),
    tag = "Settlement"
)]
pub async fn settlement_callback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettlementCallbackRequest>,
) -> ApiResult<TransferData> {
    info!(
        idempotency_key = %req.idempotency_key,
        status = %req.status,
        "Settlement callback received"
    );

    let tx = state
        .saga
        .handle_settlement_callback(req.idempotency_key, req.status)
        .await?;
    ok(TransferData::from(&tx))
}
