//! Notification dispatch seam.
//!
//! SMS and push delivery mechanics live outside this service; the trait is
//! the boundary. The default impl just logs, which is what dev and CI run.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Send a one-time code to the user's registered phone.
    async fn send_sms_code(&self, user_id: Uuid, code: &str) -> Result<(), String>;

    /// Push a Smart-OTP challenge payload to a device.
    async fn send_push_challenge(&self, push_token: &str, payload: &Value) -> Result<(), String>;
}

/// Logs instead of delivering. The code is intentionally not logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn send_sms_code(&self, user_id: Uuid, code: &str) -> Result<(), String> {
        tracing::info!(user_id = %user_id, code_len = code.len(), "SMS code dispatched");
        Ok(())
    }

    async fn send_push_challenge(&self, push_token: &str, payload: &Value) -> Result<(), String> {
        tracing::info!(
            token_prefix = &push_token[..push_token.len().min(8)],
            challenge_id = %payload.get("challenge_id").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "Push challenge dispatched"
        );
        Ok(())
    }
}
