//! Outbox sweep worker.
//!
//! Periodically drains due events to the message bus. Claiming an event is
//! a CAS to PROCESSING, so concurrent publisher instances never deliver
//! the same row twice from this side (the bus itself is at-least-once and
//! consumers are assumed idempotent).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::OutboxConfig;

use super::MessageBus;
use super::store::{OutboxError, OutboxStore};

pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn MessageBus>, config: OutboxConfig) -> Self {
        Self { store, bus, config }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            max_retries = self.config.max_retries,
            "Starting outbox publisher"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Outbox sweep failed");
            }
            tokio::time::sleep(Duration::from_secs(self.config.sweep_interval_secs)).await;
        }
    }

    /// One sweep pass. Returns the number of events published.
    pub async fn sweep_once(&self) -> Result<usize, OutboxError> {
        let due = self
            .store
            .due(
                self.config.batch_size,
                Duration::from_secs(self.config.retry_delay_secs),
                self.config.max_retries,
            )
            .await?;

        if due.is_empty() {
            debug!("No outbox events due");
            return Ok(0);
        }

        let mut published = 0;
        for event in due {
            // Soft lock: the first sweep to flip the row owns delivery.
            if !self.store.mark_processing(event.event_id).await? {
                debug!(event_id = %event.event_id, "Event claimed by another sweep");
                continue;
            }

            match self
                .bus
                .publish(&event.exchange, &event.routing_key, &event.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_completed(event.event_id).await?;
                    debug!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        routing_key = %event.routing_key,
                        "Event published"
                    );
                    published += 1;
                }
                Err(e) => {
                    let retries = self.store.mark_failed(event.event_id, &e).await?;
                    if retries >= self.config.max_retries {
                        // Permanently FAILED: kept in the table for manual
                        // remediation, never deleted, never retried.
                        error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            retries,
                            error = %e,
                            "Outbox event exhausted retries - manual remediation required"
                        );
                    } else {
                        warn!(
                            event_id = %event.event_id,
                            attempt = retries,
                            error = %e,
                            "Event publish failed (will retry)"
                        );
                    }
                }
            }
        }

        if published > 0 {
            info!(count = published, "Outbox events published this sweep");
        }
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::event::{EventStatus, NewOutboxEvent};
    use crate::outbox::store::MemOutboxStore;
    use crate::outbox::testing::ScriptedBus;
    use serde_json::json;

    fn config() -> OutboxConfig {
        OutboxConfig {
            sweep_interval_secs: 1,
            retry_delay_secs: 0,
            max_retries: 3,
            batch_size: 100,
        }
    }

    fn event(n: u32) -> NewOutboxEvent {
        NewOutboxEvent {
            aggregate_type: "transaction",
            aggregate_id: format!("tx-{n}"),
            event_type: "TransferCompleted",
            exchange: "bank.transfers",
            routing_key: "transfer.completed",
            payload: json!({"n": n}),
        }
    }

    #[tokio::test]
    async fn test_sweep_publishes_pending_once() {
        let store = Arc::new(MemOutboxStore::new());
        let bus = Arc::new(ScriptedBus::new());
        let publisher = OutboxPublisher::new(store.clone(), bus.clone(), config());

        store.push(event(1));
        store.push(event(2));

        assert_eq!(publisher.sweep_once().await.unwrap(), 2);
        assert_eq!(bus.published_count(), 2);

        // Completed events are never republished
        assert_eq!(publisher.sweep_once().await.unwrap(), 0);
        assert_eq!(bus.published_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_event_stops_at_retry_cap() {
        let store = Arc::new(MemOutboxStore::new());
        let bus = Arc::new(ScriptedBus::new());
        bus.set_fail(true);
        let publisher = OutboxPublisher::new(store.clone(), bus.clone(), config());

        let id = store.push(event(1));

        for _ in 0..3 {
            assert_eq!(publisher.sweep_once().await.unwrap(), 0);
        }
        // Cap reached: the fourth sweep does not even attempt it
        assert_eq!(publisher.sweep_once().await.unwrap(), 0);
        assert_eq!(bus.attempt_count(), 3);

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.retry_count, 3);
    }

    #[tokio::test]
    async fn test_recovery_after_transient_failure() {
        let store = Arc::new(MemOutboxStore::new());
        let bus = Arc::new(ScriptedBus::new());
        let publisher = OutboxPublisher::new(store.clone(), bus.clone(), config());

        let id = store.push(event(1));

        bus.set_fail(true);
        assert_eq!(publisher.sweep_once().await.unwrap(), 0);

        bus.set_fail(false);
        assert_eq!(publisher.sweep_once().await.unwrap(), 1);
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
    }
}
