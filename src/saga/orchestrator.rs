//! Transfer saga orchestration.
//!
//! The orchestrator sequences risk check, challenge, debit, credit or
//! settlement, and completion or compensation. Every money-moving call is
//! idempotent on the transfer id and every step change is a CAS, so a
//! resumed or duplicated run converges on the same outcome instead of
//! double-applying.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditOutcome};
use crate::banks::{BankClass, BankRegistry};
use crate::challenge::{ChallengeCoordinator, ChallengeError, ChallengeProof};
use crate::fees::FeeSchedule;
use crate::ledger::{LedgerService, failure};
use crate::limits::{LimitError, LimitTracker};
use crate::outbox::NewOutboxEvent;
use crate::risk::{RiskEngine, RiskInput, RiskProfileStore};
use crate::settlement::{SettlementGateway, SettlementOrder, SettlementStatus};

use super::step::{SagaStep, TxStatus};
use super::store::{SagaError, StepTransition, TransactionStore};
use super::types::{
    OpResult, Transaction, TransferId, TransferKind, TransferOutcome, TransferRequest,
};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown destination bank: {0}")]
    UnknownBank(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Caller does not own the source account")]
    NotOwner,

    #[error("Account is locked")]
    AccountLocked,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Transfer limit exceeded: {0}")]
    LimitExceeded(LimitError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("Transfer not found")]
    TransferNotFound,

    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

pub struct TransferSaga {
    ledger: Arc<dyn LedgerService>,
    store: Arc<dyn TransactionStore>,
    risk_engine: RiskEngine,
    profiles: Arc<dyn RiskProfileStore>,
    challenges: Arc<ChallengeCoordinator>,
    settlement: Arc<dyn SettlementGateway>,
    banks: Arc<BankRegistry>,
    fees: FeeSchedule,
    limits: Arc<LimitTracker>,
    audit: Arc<AuditLog>,
}

impl TransferSaga {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerService>,
        store: Arc<dyn TransactionStore>,
        risk_engine: RiskEngine,
        profiles: Arc<dyn RiskProfileStore>,
        challenges: Arc<ChallengeCoordinator>,
        settlement: Arc<dyn SettlementGateway>,
        banks: Arc<BankRegistry>,
        fees: FeeSchedule,
        limits: Arc<LimitTracker>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            ledger,
            store,
            risk_engine,
            profiles,
            challenges,
            settlement,
            banks,
            fees,
            limits,
            audit,
        }
    }

    fn audit_entry(
        req: &TransferRequest,
        tx_id: Option<TransferId>,
        fee: Decimal,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> AuditEntry {
        AuditEntry {
            tx_id,
            user_id: req.sender_user_id,
            sender_account_id: req.sender_account_id.clone(),
            receiver_account_id: req.receiver_account_id.clone(),
            amount: req.amount,
            fee,
            outcome,
            detail: Some(detail.into()),
        }
    }

    async fn reject(
        &self,
        req: &TransferRequest,
        fee: Decimal,
        detail: &str,
        err: TransferError,
    ) -> TransferError {
        self.audit
            .record(Self::audit_entry(req, None, fee, AuditOutcome::Rejected, detail))
            .await;
        err
    }

    /// Resolve the routing class and fee for a request, rejecting unknown
    /// bank codes before anything else happens.
    fn classify(&self, req: &TransferRequest) -> Result<(TransferKind, Decimal), TransferError> {
        let kind = match self.banks.classify(req.receiver_bank_code.as_deref()) {
            BankClass::Internal => TransferKind::Internal,
            BankClass::External => TransferKind::External,
            BankClass::Unknown => {
                let code = req.receiver_bank_code.clone().unwrap_or_default();
                return Err(TransferError::UnknownBank(code));
            }
        };
        Ok((kind, self.fees.fee_for(kind)))
    }

    /// Ownership, lock and balance validation on the sender side, plus
    /// existence of an internal receiver.
    async fn validate_accounts(
        &self,
        req: &TransferRequest,
        kind: TransferKind,
        fee: Decimal,
    ) -> Result<(), TransferError> {
        let sender = self
            .ledger
            .account(&req.sender_account_id)
            .await
            .map_err(|e| TransferError::ServiceUnavailable(e.to_string()))?;

        let Some(sender) = sender else {
            return Err(self
                .reject(
                    req,
                    fee,
                    failure::ACCOUNT_NOT_FOUND,
                    TransferError::AccountNotFound(req.sender_account_id.clone()),
                )
                .await);
        };
        if sender.owner_user_id != req.sender_user_id {
            return Err(self
                .reject(req, fee, "NOT_OWNER", TransferError::NotOwner)
                .await);
        }
        if sender.locked {
            return Err(self
                .reject(req, fee, failure::ACCOUNT_LOCKED, TransferError::AccountLocked)
                .await);
        }
        if sender.balance < req.amount + fee {
            return Err(self
                .reject(
                    req,
                    fee,
                    failure::INSUFFICIENT_FUNDS,
                    TransferError::InsufficientFunds,
                )
                .await);
        }

        if kind == TransferKind::Internal {
            let receiver = self
                .ledger
                .account(&req.receiver_account_id)
                .await
                .map_err(|e| TransferError::ServiceUnavailable(e.to_string()))?;
            if receiver.is_none() {
                return Err(self
                    .reject(
                        req,
                        fee,
                        failure::ACCOUNT_NOT_FOUND,
                        TransferError::AccountNotFound(req.receiver_account_id.clone()),
                    )
                    .await);
            }
        }

        Ok(())
    }

    /// Entry point: validate, risk-assess, then either run the saga to its
    /// synchronous outcome or park the transfer behind a challenge.
    pub async fn create_transfer(
        &self,
        req: TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        if req.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }

        let (kind, fee) = match self.classify(&req) {
            Ok(pair) => pair,
            Err(e) => {
                return Err(self.reject(&req, Decimal::ZERO, "UNKNOWN_BANK", e).await);
            }
        };

        self.validate_accounts(&req, kind, fee).await?;

        if let Err(e) = self.limits.check(req.sender_user_id, req.amount, Utc::now()).await {
            return Err(match e {
                LimitError::DatabaseError(db) => TransferError::ServiceUnavailable(db.to_string()),
                limit => {
                    self.reject(
                        &req,
                        fee,
                        "LIMIT_EXCEEDED",
                        TransferError::LimitExceeded(limit),
                    )
                    .await
                }
            });
        }

        // A profile fetch failure scores against an empty profile, which
        // pushes the tier up rather than waving the transfer through.
        let profile = match self.profiles.risk_profile(req.sender_user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %req.sender_user_id, error = %e, "Risk profile unavailable");
                Default::default()
            }
        };
        let input = RiskInput {
            user_id: req.sender_user_id,
            amount: req.amount,
            payee_id: Some(req.receiver_account_id.clone()),
            device_fingerprint: req.device_fingerprint.clone(),
            location: req.location.clone(),
        };
        let assessment = self.risk_engine.assess(&input, &profile, Utc::now());
        info!(
            user_id = %req.sender_user_id,
            score = assessment.score,
            tier = %assessment.tier,
            challenge = %assessment.challenge,
            "Transfer risk assessed"
        );

        if !assessment.requires_challenge() {
            let tx = self.materialize(req, kind, fee).await?;
            return Ok(TransferOutcome::Accepted(tx));
        }

        let descriptor = self.challenges.issue(req.clone(), &assessment).await?;
        self.audit
            .record(Self::audit_entry(
                &req,
                None,
                fee,
                AuditOutcome::ChallengeIssued,
                format!("{}:{}", descriptor.challenge_type, descriptor.challenge_id),
            ))
            .await;
        Ok(TransferOutcome::ChallengeRequired(descriptor))
    }

    /// Complete a challenge and run the parked transfer. Balance is
    /// re-validated: it may have changed since the challenge was issued.
    pub async fn verify_challenge(
        &self,
        challenge_id: Uuid,
        proof: ChallengeProof,
    ) -> Result<Transaction, TransferError> {
        let pending = self.challenges.verify(challenge_id, proof).await?;
        let req = pending.request;

        let (kind, fee) = self.classify(&req)?;
        self.validate_accounts(&req, kind, fee).await?;

        let tx = self.materialize(req, kind, fee).await?;
        Ok(tx)
    }

    /// Resend the SMS code for a parked transfer.
    pub async fn resend_challenge(&self, challenge_id: Uuid) -> Result<(), TransferError> {
        Ok(self.challenges.resend(challenge_id).await?)
    }

    /// Owner-scoped lookup.
    pub async fn get_transfer(
        &self,
        tx_id: TransferId,
        caller: Uuid,
    ) -> Result<Transaction, TransferError> {
        let tx = self
            .store
            .get(tx_id)
            .await?
            .ok_or(TransferError::TransferNotFound)?;
        if tx.sender_user_id != caller {
            return Err(TransferError::NotOwner);
        }
        Ok(tx)
    }

    /// Create the durable aggregate and drive it as far as it goes
    /// synchronously.
    async fn materialize(
        &self,
        req: TransferRequest,
        kind: TransferKind,
        fee: Decimal,
    ) -> Result<Transaction, TransferError> {
        let tx = Transaction::from_request(&req, kind, fee);
        self.store
            .insert(&tx, vec![NewOutboxEvent::transfer_initiated(&tx)])
            .await?;
        self.audit
            .record(Self::audit_entry(
                &req,
                Some(tx.tx_id),
                fee,
                AuditOutcome::Pending,
                tx.step.as_str(),
            ))
            .await;
        info!(tx_id = %tx.tx_id, kind = %kind, amount = %tx.amount, "Transfer saga started");

        self.advance(tx).await
    }

    async fn reload(&self, tx_id: TransferId) -> Result<Transaction, TransferError> {
        Ok(self
            .store
            .get(tx_id)
            .await?
            .ok_or(SagaError::NotFound(tx_id))?)
    }

    /// Drive a saga forward from its current step. Safe to call again on
    /// the same transaction: each hop is a CAS and each side effect is
    /// idempotent.
    async fn advance(&self, mut tx: Transaction) -> Result<Transaction, TransferError> {
        if tx.step == SagaStep::Started {
            // Challenge passed (or none was required)
            self.store
                .transition(
                    tx.tx_id,
                    StepTransition::new(SagaStep::Started, SagaStep::OtpVerified),
                )
                .await?;
            tx = self.reload(tx.tx_id).await?;
        }

        match tx.kind {
            TransferKind::Internal => self.run_internal(tx).await,
            TransferKind::External => self.run_external(tx).await,
        }
    }

    /// Internal path: one atomic debit+credit, then march the bookkeeping
    /// steps to COMPLETED.
    async fn run_internal(&self, tx: Transaction) -> Result<Transaction, TransferError> {
        match self
            .ledger
            .transfer_atomic(
                &tx.sender_account_id,
                &tx.receiver_account_id,
                tx.amount,
                tx.fee,
                tx.tx_id,
            )
            .await
        {
            OpResult::Success => {
                for (from, to) in [
                    (SagaStep::OtpVerified, SagaStep::DebitCompleted),
                    (SagaStep::DebitCompleted, SagaStep::CreditCompleted),
                ] {
                    self.store
                        .transition(
                            tx.tx_id,
                            StepTransition::new(from, to).status(TxStatus::Processing),
                        )
                        .await?;
                }
                self.finish_completed(tx.tx_id, SagaStep::CreditCompleted).await
            }
            OpResult::Failed(reason) => Err(self.fail_before_settlement(&tx, &reason).await?),
            OpResult::Pending => {
                warn!(tx_id = %tx.tx_id, "Ledger outcome unknown, leaving saga for the sweep");
                Err(TransferError::ServiceUnavailable(
                    "Ledger outcome unknown, transfer will be retried".to_string(),
                ))
            }
        }
    }

    /// External path: debit, then hand the transfer to the settlement rail
    /// and suspend until a callback or poll resolves it.
    async fn run_external(&self, mut tx: Transaction) -> Result<Transaction, TransferError> {
        if tx.step == SagaStep::OtpVerified {
            match self
                .ledger
                .debit(&tx.sender_account_id, tx.total_debit(), tx.tx_id)
                .await
            {
                OpResult::Success => {
                    self.store
                        .transition(
                            tx.tx_id,
                            StepTransition::new(SagaStep::OtpVerified, SagaStep::DebitCompleted)
                                .status(TxStatus::Processing),
                        )
                        .await?;
                    tx = self.reload(tx.tx_id).await?;
                }
                OpResult::Failed(reason) => {
                    return Err(self.fail_before_settlement(&tx, &reason).await?);
                }
                OpResult::Pending => {
                    warn!(tx_id = %tx.tx_id, "Debit outcome unknown, leaving saga for the sweep");
                    return Err(TransferError::ServiceUnavailable(
                        "Ledger outcome unknown, transfer will be retried".to_string(),
                    ));
                }
            }
        }

        if tx.step == SagaStep::DebitCompleted {
            tx = self.initiate_settlement(tx).await?;
        }
        Ok(tx)
    }

    async fn initiate_settlement(&self, tx: Transaction) -> Result<Transaction, TransferError> {
        let order = SettlementOrder {
            idempotency_key: tx.idempotency_key,
            sender_account_id: tx.sender_account_id.clone(),
            receiver_account_id: tx.receiver_account_id.clone(),
            receiver_bank_code: tx.receiver_bank_code.clone().unwrap_or_default(),
            amount: tx.amount,
            description: tx.description.clone(),
        };

        match self.settlement.initiate(&order).await {
            Ok(ticket) if ticket.status == SettlementStatus::Failed => {
                // The rail answered and refused: compensate now
                self.compensate_external(tx, "SETTLEMENT_REJECTED").await
            }
            Ok(ticket) => {
                let transition =
                    StepTransition::new(SagaStep::DebitCompleted, SagaStep::ExternalInitiated)
                        .status(TxStatus::Processing)
                        .external_ref(ticket.reference.clone())
                        .event(NewOutboxEvent::settlement_requested(&tx, &ticket.reference));
                self.store.transition(tx.tx_id, transition).await?;
                info!(
                    tx_id = %tx.tx_id,
                    reference = ticket.reference,
                    "Settlement initiated, saga suspended"
                );

                let mut tx = self.reload(tx.tx_id).await?;
                if ticket.status == SettlementStatus::Completed {
                    tx = self
                        .apply_settlement_result(tx, SettlementStatus::Completed)
                        .await?;
                }
                Ok(tx)
            }
            Err(e) if e.outcome_unknown() => {
                // The order may have reached the rail; never refund here.
                // The timeout sweep re-initiates under the same key.
                warn!(tx_id = %tx.tx_id, error = %e, "Settlement initiation outcome unknown");
                Ok(tx)
            }
            Err(e) => {
                warn!(tx_id = %tx.tx_id, error = %e, "Settlement initiation rejected");
                self.compensate_external(tx, &e.to_string()).await
            }
        }
    }

    /// Apply an authoritative settlement status, from a callback or a
    /// poll. Duplicate deliveries are no-ops: the first one moves the saga
    /// to a terminal step and later ones see it there.
    pub async fn handle_settlement_callback(
        &self,
        idempotency_key: Uuid,
        status: SettlementStatus,
    ) -> Result<Transaction, TransferError> {
        let tx = self
            .store
            .get_by_idempotency_key(idempotency_key)
            .await?
            .ok_or(TransferError::TransferNotFound)?;
        self.apply_settlement_result(tx, status).await
    }

    async fn apply_settlement_result(
        &self,
        tx: Transaction,
        status: SettlementStatus,
    ) -> Result<Transaction, TransferError> {
        if tx.step.is_terminal() || tx.step != SagaStep::ExternalInitiated {
            return Ok(tx);
        }

        match status {
            SettlementStatus::Completed => {
                self.store
                    .transition(
                        tx.tx_id,
                        StepTransition::new(
                            SagaStep::ExternalInitiated,
                            SagaStep::ExternalCompleted,
                        )
                        .status(TxStatus::Processing),
                    )
                    .await?;
                self.finish_completed(tx.tx_id, SagaStep::ExternalCompleted).await
            }
            SettlementStatus::Failed => {
                self.store
                    .transition(
                        tx.tx_id,
                        StepTransition::new(SagaStep::ExternalInitiated, SagaStep::ExternalFailed)
                            .failure(SagaStep::ExternalInitiated, "SETTLEMENT_FAILED"),
                    )
                    .await?;
                let tx = self.reload(tx.tx_id).await?;
                self.compensate_refund(tx).await
            }
            SettlementStatus::Pending | SettlementStatus::Processing => Ok(tx),
        }
    }

    /// Final hop to COMPLETED: completion event, limit counters, audit.
    async fn finish_completed(
        &self,
        tx_id: TransferId,
        from: SagaStep,
    ) -> Result<Transaction, TransferError> {
        let mut completed_view = self.reload(tx_id).await?;
        completed_view.step = SagaStep::Completed;

        let transition = StepTransition::new(from, SagaStep::Completed)
            .status(TxStatus::Completed)
            .completed()
            .event(NewOutboxEvent::transfer_completed(&completed_view));
        let won = self.store.transition(tx_id, transition).await?;
        let tx = self.reload(tx_id).await?;

        if won {
            if let Err(e) = self
                .limits
                .record(tx.sender_user_id, tx.amount, Utc::now())
                .await
            {
                warn!(tx_id = %tx.tx_id, error = %e, "Limit counter update failed");
            }
            self.audit
                .record(AuditEntry {
                    tx_id: Some(tx.tx_id),
                    user_id: tx.sender_user_id,
                    sender_account_id: tx.sender_account_id.clone(),
                    receiver_account_id: tx.receiver_account_id.clone(),
                    amount: tx.amount,
                    fee: tx.fee,
                    outcome: AuditOutcome::Completed,
                    detail: None,
                })
                .await;
            info!(tx_id = %tx.tx_id, "Transfer completed");
        }
        Ok(tx)
    }

    /// Terminalize a saga that failed before settlement involvement, with
    /// no money in flight (or an idempotent debit that never happened).
    async fn fail_before_settlement(
        &self,
        tx: &Transaction,
        reason: &str,
    ) -> Result<TransferError, TransferError> {
        let mut failed_view = tx.clone();
        failed_view.step = SagaStep::Failed;

        let transition = StepTransition::new(tx.step, SagaStep::Failed)
            .status(TxStatus::Failed)
            .failure(tx.step, reason)
            .event(NewOutboxEvent::transfer_failed(&failed_view, reason));
        self.store.transition(tx.tx_id, transition).await?;

        self.audit
            .record(AuditEntry {
                tx_id: Some(tx.tx_id),
                user_id: tx.sender_user_id,
                sender_account_id: tx.sender_account_id.clone(),
                receiver_account_id: tx.receiver_account_id.clone(),
                amount: tx.amount,
                fee: tx.fee,
                outcome: AuditOutcome::Failed,
                detail: Some(reason.to_string()),
            })
            .await;
        warn!(tx_id = %tx.tx_id, reason, "Transfer failed before settlement");

        Ok(match reason {
            failure::INSUFFICIENT_FUNDS => TransferError::InsufficientFunds,
            failure::ACCOUNT_NOT_FOUND => {
                TransferError::AccountNotFound(tx.receiver_account_id.clone())
            }
            failure::ACCOUNT_LOCKED => TransferError::AccountLocked,
            other => TransferError::ServiceUnavailable(other.to_string()),
        })
    }

    /// Mark an external failure and refund the sender.
    async fn compensate_external(
        &self,
        tx: Transaction,
        reason: &str,
    ) -> Result<Transaction, TransferError> {
        self.store
            .transition(
                tx.tx_id,
                StepTransition::new(tx.step, SagaStep::ExternalFailed)
                    .failure(tx.step, reason),
            )
            .await?;
        let tx = self.reload(tx.tx_id).await?;
        self.compensate_refund(tx).await
    }

    /// Refund amount + fee to the sender after an external failure.
    /// A failed refund is terminal too, but loudly: ROLLBACK_FAILED rows
    /// carry a manual-intervention alert, never silence.
    async fn compensate_refund(&self, tx: Transaction) -> Result<Transaction, TransferError> {
        let refund = tx.total_debit();
        let reason = tx
            .failure_reason
            .clone()
            .unwrap_or_else(|| "SETTLEMENT_FAILED".to_string());

        match self
            .ledger
            .refund(&tx.sender_account_id, refund, tx.tx_id)
            .await
        {
            OpResult::Success => {
                let transition =
                    StepTransition::new(SagaStep::ExternalFailed, SagaStep::RollbackCompleted)
                        .status(TxStatus::Failed)
                        .event(NewOutboxEvent::refund_completed(&tx))
                        .event(NewOutboxEvent::transfer_failed(&tx, &reason));
                self.store.transition(tx.tx_id, transition).await?;

                self.audit
                    .record(AuditEntry {
                        tx_id: Some(tx.tx_id),
                        user_id: tx.sender_user_id,
                        sender_account_id: tx.sender_account_id.clone(),
                        receiver_account_id: tx.receiver_account_id.clone(),
                        amount: tx.amount,
                        fee: tx.fee,
                        outcome: AuditOutcome::RolledBack,
                        detail: Some(reason),
                    })
                    .await;
                info!(tx_id = %tx.tx_id, refund = %refund, "Sender refunded after settlement failure");
            }
            outcome => {
                let detail = match &outcome {
                    OpResult::Failed(e) => e.clone(),
                    _ => "REFUND_OUTCOME_UNKNOWN".to_string(),
                };
                self.store
                    .transition(
                        tx.tx_id,
                        StepTransition::new(SagaStep::ExternalFailed, SagaStep::RollbackFailed)
                            .status(TxStatus::Failed),
                    )
                    .await?;

                error!(
                    tx_id = %tx.tx_id,
                    account = tx.sender_account_id,
                    refund = %refund,
                    detail,
                    "REFUND FAILED - manual intervention required"
                );
                self.audit
                    .record(AuditEntry {
                        tx_id: Some(tx.tx_id),
                        user_id: tx.sender_user_id,
                        sender_account_id: tx.sender_account_id.clone(),
                        receiver_account_id: tx.receiver_account_id.clone(),
                        amount: tx.amount,
                        fee: tx.fee,
                        outcome: AuditOutcome::RollbackFailed,
                        detail: Some(detail),
                    })
                    .await;
            }
        }

        self.reload(tx.tx_id).await
    }

    /// Resume a stalled saga from wherever it stopped. Used by the timeout
    /// sweep; every branch is idempotent.
    pub async fn resume(&self, tx: Transaction) -> Result<Transaction, TransferError> {
        match tx.step {
            step if step.is_terminal() => Ok(tx),
            SagaStep::ExternalInitiated => {
                let Some(reference) = tx.external_ref.clone() else {
                    // Cannot happen through normal flow; fall back to polling by re-initiation
                    return self.initiate_settlement(tx).await;
                };
                match self.settlement.query_status(&reference).await {
                    Ok(status) => {
                        info!(tx_id = %tx.tx_id, reference, status = %status, "Stalled saga polled");
                        self.apply_settlement_result(tx, status).await
                    }
                    Err(e) => {
                        warn!(tx_id = %tx.tx_id, error = %e, "Settlement status poll failed");
                        Ok(tx)
                    }
                }
            }
            SagaStep::ExternalCompleted => {
                self.finish_completed(tx.tx_id, SagaStep::ExternalCompleted).await
            }
            SagaStep::ExternalFailed => self.compensate_refund(tx).await,
            _ => self.advance(tx).await,
        }
    }

    /// Stalled sagas for the sweep, delegated to the store.
    pub async fn stalled(
        &self,
        cutoff: chrono::DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Transaction>, TransferError> {
        Ok(self.store.stalled(cutoff, batch).await?)
    }
}
