//! Riskgate - Risk-Adaptive Funds Transfer Orchestration
//!
//! A saga-orchestrated transfer core for a retail bank:
//! risk scoring decides how much authentication a transfer needs,
//! a compensatable state machine moves the money, and a transactional
//! outbox guarantees downstream events are eventually delivered.
//!
//! # Modules
//!
//! - [`risk`] - Additive risk scoring and tiering
//! - [`challenge`] - SMS / Smart-OTP challenge coordination
//! - [`device`] - Device trust store and Smart-OTP challenges
//! - [`saga`] - Transfer saga orchestrator and state machine
//! - [`outbox`] - Transactional outbox publisher
//! - [`settlement`] - Interbank settlement gateway adapter
//! - [`ledger`] - Balance debit/credit primitives
//! - [`gateway`] - HTTP API surface

// Cross-cutting concerns
pub mod audit;
pub mod banks;
pub mod config;
pub mod fees;
pub mod limits;
pub mod logging;
pub mod notify;
pub mod rng;

// Domain components
pub mod challenge;
pub mod device;
pub mod ledger;
pub mod outbox;
pub mod risk;
pub mod saga;
pub mod settlement;

// HTTP surface
pub mod gateway;

// Convenient re-exports at crate root
pub use banks::{BankClass, BankRegistry};
pub use challenge::{ChallengeCoordinator, ChallengeError, ChallengeProof};
pub use device::{DeviceTrustStore, SmartChallengeOutcome, SmartVerifyOutcome};
pub use ledger::{LedgerService, PgLedger};
pub use outbox::{MessageBus, OutboxPublisher, OutboxStore};
pub use risk::{ChallengeType, RiskAssessment, RiskEngine, RiskTier};
pub use saga::{SagaStep, TransferId, TransferOutcome, TransferSaga};
pub use settlement::{SettlementGateway, SettlementStatus};
