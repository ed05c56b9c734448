//! Stalled-saga sweep.
//!
//! Sagas suspend whenever an outcome is unknown: a settlement that never
//! called back, a crash between steps, a ledger timeout. This worker
//! periodically picks up transactions that have sat in a non-terminal step
//! past the stuck threshold and resumes each one from where it stopped.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::SettlementConfig;

use super::orchestrator::TransferSaga;

pub struct SettlementSweep {
    saga: Arc<TransferSaga>,
    config: SettlementConfig,
}

impl SettlementSweep {
    pub fn new(saga: Arc<TransferSaga>, config: SettlementConfig) -> Self {
        Self { saga, config }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            stuck_threshold_secs = self.config.stuck_threshold_secs,
            "Starting settlement sweep"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Settlement sweep failed");
            }
            tokio::time::sleep(Duration::from_secs(self.config.sweep_interval_secs)).await;
        }
    }

    /// One sweep pass. Returns how many stalled sagas were resumed.
    pub async fn sweep_once(&self) -> Result<usize, super::orchestrator::TransferError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.stuck_threshold_secs as i64);
        let stalled = self.saga.stalled(cutoff, 100).await?;

        if stalled.is_empty() {
            debug!("No stalled transfers");
            return Ok(0);
        }

        info!(count = stalled.len(), "Resuming stalled transfers");
        let mut resumed = 0;
        for tx in stalled {
            let tx_id = tx.tx_id;
            let step = tx.step;
            match self.saga.resume(tx).await {
                Ok(after) => {
                    info!(
                        tx_id = %tx_id,
                        from = %step,
                        to = %after.step,
                        "Stalled transfer resumed"
                    );
                    resumed += 1;
                }
                Err(e) => {
                    // Left in place; the next sweep tries again
                    warn!(tx_id = %tx_id, step = %step, error = %e, "Resume failed");
                }
            }
        }
        Ok(resumed)
    }
}
