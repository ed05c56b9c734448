//! HTTP API surface.
//!
//! Thin axum layer over the saga orchestrator and the device trust
//! store: handlers validate input, map domain errors to stable error
//! codes, and never hold business logic of their own.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::AppState;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/banks", get(handlers::list_banks))
        .route("/transfers", post(handlers::create_transfer))
        .route("/transfers/verify", post(handlers::verify_challenge))
        .route("/transfers/resend", post(handlers::resend_challenge))
        .route("/transfers/{tx_id}", get(handlers::get_transfer))
        .route("/devices", post(handlers::register_device))
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{device_id}", delete(handlers::revoke_device))
        .route("/settlements/callback", post(handlers::settlement_callback));

    let app = Router::new().nest("/api/v1", api);

    // [SECURITY] Mock routes - only compiled with the 'mock-api' feature.
    // Production builds MUST exclude this with `--no-default-features`.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route(
            "/devices/{device_id}/approve",
            post(handlers::mock_approve_device),
        ),
    );

    app.with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Start the HTTP gateway server.
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr, error = %e, "Failed to bind gateway port");
            std::process::exit(1);
        }
    };

    info!(addr, "Gateway listening");
    info!("API docs at http://{}/docs", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
