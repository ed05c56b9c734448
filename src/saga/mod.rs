//! Transfer saga: the state machine that moves money.
//!
//! A transfer is a sequence of idempotent steps over collaborators that
//! can each fail independently (ledger, settlement rail). The saga record
//! in PostgreSQL is the source of truth for progress; every step change is
//! a compare-and-swap and failures after money moved are compensated with
//! a refund.

pub mod orchestrator;
pub mod step;
pub mod store;
pub mod types;
pub mod worker;

pub use orchestrator::{TransferError, TransferSaga};
pub use step::{SagaStep, TxStatus};
pub use store::{MemTransactionStore, PgTransactionStore, SagaError, StepTransition, TransactionStore};
pub use types::{
    ChallengeDescriptor, OpResult, Transaction, TransferId, TransferKind, TransferOutcome,
    TransferRequest,
};
pub use worker::SettlementSweep;
