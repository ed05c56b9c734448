use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::banks::BankRegistry;
use crate::device::DeviceTrustStore;
use crate::saga::TransferSaga;

use super::types::ApiError;

/// Shared gateway state.
#[derive(Clone)]
pub struct AppState {
    pub saga: Arc<TransferSaga>,
    pub devices: Arc<DeviceTrustStore>,
    pub banks: Arc<BankRegistry>,
}

impl AppState {
    pub fn new(
        saga: Arc<TransferSaga>,
        devices: Arc<DeviceTrustStore>,
        banks: Arc<BankRegistry>,
    ) -> Self {
        Self {
            saga,
            devices,
            banks,
        }
    }
}

/// Caller identity from the `X-User-Id` header, set by the edge
/// authentication layer in front of this service.
pub fn caller_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(ApiError::missing_auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_parses_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("X-User-Id", id.to_string().parse().unwrap());
        assert_eq!(caller_id(&headers).unwrap(), id);
    }

    #[test]
    fn test_caller_id_rejects_missing_or_garbage() {
        let headers = HeaderMap::new();
        assert!(caller_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("X-User-Id", "not-a-uuid".parse().unwrap());
        assert!(caller_id(&headers).is_err());
    }
}
