//! Transactional outbox.
//!
//! State changes and the events describing them commit in one database
//! transaction; a background sweep then delivers the events to the
//! message bus. Delivery is at-least-once with a hard retry cap.

pub mod event;
pub mod publisher;
pub mod store;

pub use event::{EventStatus, NewOutboxEvent, OutboxEvent, destinations, event_types};
pub use publisher::OutboxPublisher;
pub use store::{MemOutboxStore, OutboxError, OutboxStore, PgOutboxStore, insert_event};

use async_trait::async_trait;
use serde_json::Value;

/// Downstream message bus. Errors are plain strings: the publisher only
/// records them for remediation, it never branches on their shape.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &Value)
    -> Result<(), String>;
}

/// Log-only bus for simulation mode: every publish lands in the
/// structured log instead of a broker.
pub struct TracingBus;

#[async_trait]
impl MessageBus for TracingBus {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &Value,
    ) -> Result<(), String> {
        tracing::info!(exchange, routing_key, %payload, "[bus] event published");
        Ok(())
    }
}
