//! Device enrollment endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;
use validator::Validate;

use crate::device::DeviceRegistration;

use super::super::state::{AppState, caller_id};
use super::super::types::{ApiError, ApiResponse, ApiResult, DeviceData, RegisterDeviceRequest, ok};

/// Enroll a device for Smart-OTP.
///
/// The device starts untrusted; a separate approval flow marks it
/// trusted before it can receive challenges.
#[utoipa::path(
    post,
    path = "/api/v1/devices",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 200, description = "Device enrolled, pending trust approval", body = ApiResponse<DeviceData>),
        (status = 400, description = "Malformed public key"),
        (status = 409, description = "Fingerprint already enrolled")
    ),
    tag = "Devices"
)]
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterDeviceRequest>,
) -> ApiResult<DeviceData> {
    let user_id = caller_id(&headers)?;
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let device = state
        .devices
        .register_device(
            user_id,
            DeviceRegistration {
                fingerprint: req.fingerprint,
                device_name: req.device_name,
                public_key: req.public_key,
                push_token: req.push_token,
                biometric_enabled: req.biometric_enabled,
            },
        )
        .await?;
    ok(DeviceData::from(&device))
}

/// List the caller's enrolled devices.
#[utoipa::path(
    get,
    path = "/api/v1/devices",
    responses(
        (status = 200, description = "Devices", body = ApiResponse<Vec<DeviceData>>),
        (status = 401, description = "Missing caller identity")
    ),
    tag = "Devices"
)]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<DeviceData>> {
    let user_id = caller_id(&headers)?;
    let devices = state.devices.list_devices(user_id).await?;
    ok(devices.iter().map(DeviceData::from).collect())
}

/// Revoke one of the caller's devices.
#[utoipa::path(
    delete,
    path = "/api/v1/devices/{device_id}",
    params(("device_id" = Uuid, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Device revoked"),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "Device not found")
    ),
    tag = "Devices"
)]
pub async fn revoke_device(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<Uuid>,
) -> ApiResult<()> {
    let user_id = caller_id(&headers)?;
    state.devices.revoke_device(user_id, device_id).await?;
    ok(())
}

/// Approve a device as trusted.
///
/// Stand-in for the back-office approval surface; only compiled with
/// the `mock-api` feature and never part of a production build.
#[cfg(feature = "mock-api")]
#[utoipa::path(
    post,
    path = "/internal/mock/devices/{device_id}/approve",
    params(("device_id" = Uuid, Path, description = "Device ID")),
    responses((status = 200, description = "Device marked trusted")),
    tag = "Mock"
)]
pub async fn mock_approve_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<Uuid>,
) -> ApiResult<()> {
    state.devices.approve_device(device_id).await?;
    ok(())
}
