//! OpenAPI / Swagger UI documentation.
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use super::handlers::HealthResponse;
use super::types::{
    BankData, BankListData, ChallengeData, CreateTransferData, CreateTransferRequest, DeviceData,
    RegisterDeviceRequest, ResendChallengeRequest, SettlementCallbackRequest, TransferData,
    VerifyChallengeRequest,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Riskgate Transfer API",
        version = "1.0.0",
        description = "Risk-adaptive funds transfer orchestration: challenge-gated transfers, device trust, interbank settlement.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::system::health_check,
        crate::gateway::handlers::system::list_banks,
        crate::gateway::handlers::transfers::create_transfer,
        crate::gateway::handlers::transfers::verify_challenge,
        crate::gateway::handlers::transfers::resend_challenge,
        crate::gateway::handlers::transfers::get_transfer,
        crate::gateway::handlers::devices::register_device,
        crate::gateway::handlers::devices::list_devices,
        crate::gateway::handlers::devices::revoke_device,
        crate::gateway::handlers::settlement::settlement_callback,
    ),
    components(
        schemas(
            HealthResponse,
            BankData,
            BankListData,
            CreateTransferRequest,
            VerifyChallengeRequest,
            ResendChallengeRequest,
            CreateTransferData,
            ChallengeData,
            TransferData,
            RegisterDeviceRequest,
            DeviceData,
            SettlementCallbackRequest,
        )
    ),
    tags(
        (name = "Transfers", description = "Transfer creation, challenge completion and lookup"),
        (name = "Devices", description = "Smart-OTP device enrollment and revocation"),
        (name = "Settlement", description = "Interbank settlement callbacks"),
        (name = "System", description = "Health checks and reference data")
    )
)]
pub struct ApiDoc;
