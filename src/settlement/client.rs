//! HTTP client for the settlement gateway.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SettlementConfig;

use super::{SettlementError, SettlementGateway, SettlementOrder, SettlementStatus, SettlementTicket};

#[derive(Debug, Deserialize)]
struct TicketResponse {
    reference: String,
    status: SettlementStatus,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: SettlementStatus,
}

pub struct HttpSettlementGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettlementGateway {
    pub fn new(config: &SettlementConfig) -> Result<Self, SettlementError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_send_error(e: reqwest::Error) -> SettlementError {
        if e.is_timeout() {
            SettlementError::Timeout
        } else {
            SettlementError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    async fn initiate(&self, order: &SettlementOrder) -> Result<SettlementTicket, SettlementError> {
        let url = format!("{}/api/v1/settlements", self.base_url);
        debug!(
            idempotency_key = %order.idempotency_key,
            bank = order.receiver_bank_code,
            "Initiating settlement"
        );

        let response = self
            .client
            .post(&url)
            // Idempotency rides in the header as well as the body so the
            // gateway can dedupe before parsing.
            .header("Idempotency-Key", order.idempotency_key.to_string())
            .json(order)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(http_status = status.as_u16(), "Settlement initiate rejected");
            return Err(SettlementError::HttpStatus(status.as_u16()));
        }

        let ticket: TicketResponse = response
            .json()
            .await
            .map_err(|e| SettlementError::InvalidResponse(e.to_string()))?;

        Ok(SettlementTicket {
            reference: ticket.reference,
            status: ticket.status,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<SettlementStatus, SettlementError> {
        let url = format!("{}/api/v1/settlements/{}", self.base_url, reference);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SettlementError::HttpStatus(status.as_u16()));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| SettlementError::InvalidResponse(e.to_string()))?;

        debug!(reference, status = %body.status, "Settlement status polled");
        Ok(body.status)
    }
}
