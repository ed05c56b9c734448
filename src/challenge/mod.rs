//! Step-up authentication for risky transfers.

pub mod coordinator;
pub mod store;

pub use coordinator::{ChallengeCoordinator, ChallengeError, ChallengeProof};
pub use store::{CodeCheck, PendingStore, PendingTransfer, ResendCheck};
