//! HTTP handlers, grouped by surface.

pub mod devices;
pub mod settlement;
pub mod system;
pub mod transfers;

#[cfg(feature = "mock-api")]
pub use devices::mock_approve_device;
pub use devices::{list_devices, register_device, revoke_device};
pub use settlement::settlement_callback;
pub use system::{HealthResponse, health_check, list_banks};
pub use transfers::{create_transfer, get_transfer, resend_challenge, verify_challenge};
