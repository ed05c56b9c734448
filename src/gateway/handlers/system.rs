//! Health and reference-data endpoints.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiResponse, ApiResult, BankData, BankListData, ok};

/// Health check response data.
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
    #[schema(example = "0.1.0")]
    pub version: &'static str,
    /// Git revision the binary was built from
    #[schema(example = "a1b2c3d")]
    pub git_hash: &'static str,
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = ApiResponse<HealthResponse>)
    ),
    tag = "System"
)]
pub async fn health_check() -> ApiResult<HealthResponse> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    ok(HealthResponse {
        timestamp_ms,
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
    })
}

/// Banks reachable from this service.
#[utoipa::path(
    get,
    path = "/api/v1/banks",
    responses(
        (status = 200, description = "Home bank code plus registered counterparties", body = ApiResponse<BankListData>)
    ),
    tag = "System"
)]
pub async fn list_banks(State(state): State<Arc<AppState>>) -> ApiResult<BankListData> {
    let external = state
        .banks
        .external_banks()
        .into_iter()
        .map(|b| BankData {
            code: b.code.clone(),
            display_name: b.display_name.clone(),
        })
        .collect();

    ok(BankListData {
        home_code: state.banks.home_code().to_string(),
        external,
    })
}
