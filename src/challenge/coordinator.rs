//! Challenge issuance and verification.
//!
//! The coordinator sits between the risk engine and the saga: a MEDIUM or
//! HIGH assessment parks the transfer behind a challenge here, and only a
//! verified proof releases it to the orchestrator. SMS and Smart-OTP share
//! the same single-use, TTL-bound pending entry; they differ only in what
//! counts as proof.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ChallengeConfig;
use crate::device::{DeviceError, DeviceTrustStore, SmartChallengeOutcome, SmartVerifyOutcome};
use crate::notify::NotificationDispatcher;
use crate::outbox::{NewOutboxEvent, OutboxStore};
use crate::risk::{ChallengeType, RiskAssessment};
use crate::rng::SecureRng;
use crate::saga::{ChallengeDescriptor, TransferRequest};

use super::store::{CodeCheck, PendingStore, PendingTransfer, ResendCheck};

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Challenge not found or expired")]
    NotFound,

    #[error("Invalid code, {attempts_left} attempts left")]
    InvalidOtp { attempts_left: u32 },

    #[error("Too many failed attempts, challenge locked")]
    AttemptsExhausted,

    #[error("Challenge rejected on the device")]
    Rejected,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Resend requested too soon")]
    CooldownActive,

    #[error("Challenge does not accept this proof kind")]
    WrongProofKind,

    #[error("Code dispatch failed: {0}")]
    DispatchFailed(String),

    #[error(transparent)]
    Device(DeviceError),
}

impl From<DeviceError> for ChallengeError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::ChallengeNotFound(_) => ChallengeError::NotFound,
            other => ChallengeError::Device(other),
        }
    }
}

/// Proof submitted against a challenge.
#[derive(Debug, Clone)]
pub enum ChallengeProof {
    /// SMS one-time code
    Code(String),
    /// Smart-OTP device response: signature over the nonce plus the
    /// user's on-screen decision
    Signature { signature: String, approved: bool },
}

pub struct ChallengeCoordinator {
    pending: Arc<PendingStore>,
    devices: Arc<DeviceTrustStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    rng: Arc<dyn SecureRng>,
    outbox: Arc<dyn OutboxStore>,
    config: ChallengeConfig,
}

impl ChallengeCoordinator {
    pub fn new(
        pending: Arc<PendingStore>,
        devices: Arc<DeviceTrustStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        rng: Arc<dyn SecureRng>,
        outbox: Arc<dyn OutboxStore>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            pending,
            devices,
            notifier,
            rng,
            outbox,
            config,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.pending_ttl_secs as i64)
    }

    /// Park `request` behind the challenge the assessment demands and
    /// return the descriptor for the caller. Only called for MEDIUM/HIGH.
    pub async fn issue(
        &self,
        request: TransferRequest,
        assessment: &RiskAssessment,
    ) -> Result<ChallengeDescriptor, ChallengeError> {
        let challenge_id = Uuid::new_v4();

        match assessment.challenge {
            ChallengeType::SmsOtp => {
                self.issue_sms(challenge_id, request, assessment, None).await
            }
            ChallengeType::SmartOtp => {
                let context = json!({
                    "amount": request.amount.to_string(),
                    "receiver_account_id": request.receiver_account_id,
                });
                match self
                    .devices
                    .create_challenge(request.sender_user_id, context)
                    .await?
                {
                    SmartChallengeOutcome::Issued(smart) => {
                        self.pending.insert(
                            challenge_id,
                            request,
                            assessment.tier,
                            ChallengeType::SmartOtp,
                            None,
                            Some(smart.challenge_id),
                            self.ttl(),
                        );
                        info!(
                            challenge_id = %challenge_id,
                            smart_challenge_id = %smart.challenge_id,
                            "Transfer parked behind Smart-OTP"
                        );
                        Ok(ChallengeDescriptor {
                            challenge_id,
                            challenge_type: ChallengeType::SmartOtp,
                            guidance: "Approve this transfer in your banking app".to_string(),
                            expiry_seconds: self.config.smart_otp_expiry_secs,
                        })
                    }
                    SmartChallengeOutcome::FallbackToSms => {
                        // HIGH risk but no eligible device: degrade, don't block
                        self.issue_sms(
                            challenge_id,
                            request,
                            assessment,
                            Some("No trusted device available, code sent by SMS"),
                        )
                        .await
                    }
                }
            }
            ChallengeType::None => {
                // LOW tier never reaches the coordinator
                Err(ChallengeError::WrongProofKind)
            }
        }
    }

    async fn issue_sms(
        &self,
        challenge_id: Uuid,
        request: TransferRequest,
        assessment: &RiskAssessment,
        fallback_note: Option<&str>,
    ) -> Result<ChallengeDescriptor, ChallengeError> {
        let code = self.rng.otp_code();
        let user_id = request.sender_user_id;

        self.notifier
            .send_sms_code(user_id, &code)
            .await
            .map_err(ChallengeError::DispatchFailed)?;

        self.pending.insert(
            challenge_id,
            request,
            assessment.tier,
            ChallengeType::SmsOtp,
            Some(code),
            None,
            self.ttl(),
        );

        if let Err(e) = self
            .outbox
            .enqueue(NewOutboxEvent::otp_generated(challenge_id, user_id))
            .await
        {
            warn!(challenge_id = %challenge_id, error = %e, "OtpGenerated enqueue failed");
        }

        info!(challenge_id = %challenge_id, user_id = %user_id, "Transfer parked behind SMS OTP");
        Ok(ChallengeDescriptor {
            challenge_id,
            challenge_type: ChallengeType::SmsOtp,
            guidance: fallback_note
                .unwrap_or("Enter the code sent to your registered phone")
                .to_string(),
            expiry_seconds: self.config.pending_ttl_secs,
        })
    }

    /// Verify a proof. Success consumes the pending entry exactly once
    /// and hands the parked transfer back; the orchestrator materializes
    /// it from there.
    pub async fn verify(
        &self,
        challenge_id: Uuid,
        proof: ChallengeProof,
    ) -> Result<PendingTransfer, ChallengeError> {
        match proof {
            ChallengeProof::Code(code) => {
                let Some(entry) = self.pending.peek(challenge_id) else {
                    return Err(ChallengeError::NotFound);
                };
                if entry.challenge != ChallengeType::SmsOtp {
                    return Err(ChallengeError::WrongProofKind);
                }

                match self
                    .pending
                    .check_code(challenge_id, &code, self.config.max_attempts)
                {
                    CodeCheck::Match(transfer) => Ok(*transfer),
                    CodeCheck::Mismatch { attempts_left } => {
                        warn!(challenge_id = %challenge_id, attempts_left, "Wrong OTP code");
                        Err(ChallengeError::InvalidOtp { attempts_left })
                    }
                    CodeCheck::LockedOut => {
                        warn!(challenge_id = %challenge_id, "OTP attempts exhausted");
                        Err(ChallengeError::AttemptsExhausted)
                    }
                    CodeCheck::NotFound => Err(ChallengeError::NotFound),
                }
            }
            ChallengeProof::Signature {
                signature,
                approved,
            } => {
                let Some(entry) = self.pending.peek(challenge_id) else {
                    return Err(ChallengeError::NotFound);
                };
                let Some(smart_id) = entry.smart_challenge_id else {
                    return Err(ChallengeError::WrongProofKind);
                };

                let outcome = self.devices.verify(smart_id, &signature, approved).await?;
                match outcome {
                    SmartVerifyOutcome::Approved => {
                        // The removal is the race arbiter: one winner
                        self.pending
                            .take(challenge_id)
                            .ok_or(ChallengeError::NotFound)
                    }
                    SmartVerifyOutcome::Rejected => {
                        // Terminal either way; drop the parked transfer too
                        self.pending.take(challenge_id);
                        Err(ChallengeError::Rejected)
                    }
                    SmartVerifyOutcome::InvalidSignature => {
                        self.pending.take(challenge_id);
                        Err(ChallengeError::InvalidSignature)
                    }
                }
            }
        }
    }

    /// Regenerate and redispatch the SMS code for a still-pending
    /// transfer. Attempt counters survive the resend.
    pub async fn resend(&self, challenge_id: Uuid) -> Result<(), ChallengeError> {
        let code = self.rng.otp_code();
        let cooldown = Duration::seconds(self.config.resend_cooldown_secs as i64);

        match self.pending.replace_code(challenge_id, &code, cooldown) {
            ResendCheck::Accepted => {}
            ResendCheck::CooldownActive => return Err(ChallengeError::CooldownActive),
            ResendCheck::NotSms => return Err(ChallengeError::WrongProofKind),
            ResendCheck::NotFound => return Err(ChallengeError::NotFound),
        }

        let Some(entry) = self.pending.peek(challenge_id) else {
            return Err(ChallengeError::NotFound);
        };
        self.notifier
            .send_sms_code(entry.request.sender_user_id, &code)
            .await
            .map_err(ChallengeError::DispatchFailed)?;

        if let Err(e) = self
            .outbox
            .enqueue(NewOutboxEvent::otp_generated(
                challenge_id,
                entry.request.sender_user_id,
            ))
            .await
        {
            warn!(challenge_id = %challenge_id, error = %e, "OtpGenerated enqueue failed");
        }

        info!(challenge_id = %challenge_id, "OTP code resent");
        Ok(())
    }

    /// Drop expired pending entries. Run by the expiry sweep.
    pub fn purge_expired(&self) -> usize {
        let purged = self.pending.purge_expired();
        if purged > 0 {
            info!(purged, "Purged expired pending transfers");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChallengeConfig;
    use crate::device::signature::testing::{generate_keypair, sign_nonce};
    use crate::device::{DeviceRegistration, MemDeviceRepo};
    use crate::notify::testing::RecordingDispatcher;
    use crate::outbox::MemOutboxStore;
    use crate::outbox::event::event_types;
    use crate::risk::{RiskAssessment, RiskTier};
    use crate::rng::testing::SeqRng;
    use rust_decimal::Decimal;

    struct Setup {
        coordinator: ChallengeCoordinator,
        devices: Arc<DeviceTrustStore>,
        dispatcher: Arc<RecordingDispatcher>,
        outbox: Arc<MemOutboxStore>,
    }

    fn setup_with(rng: SeqRng, config: ChallengeConfig) -> Setup {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let rng: Arc<dyn SecureRng> = Arc::new(rng);
        let devices = Arc::new(DeviceTrustStore::new(
            Arc::new(MemDeviceRepo::new()),
            dispatcher.clone(),
            rng.clone(),
            config.clone(),
        ));
        let outbox = Arc::new(MemOutboxStore::new());
        let coordinator = ChallengeCoordinator::new(
            Arc::new(PendingStore::new()),
            devices.clone(),
            dispatcher.clone(),
            rng,
            outbox.clone(),
            config,
        );
        Setup {
            coordinator,
            devices,
            dispatcher,
            outbox,
        }
    }

    fn setup() -> Setup {
        setup_with(
            SeqRng::new(vec!["111111", "222222"], vec!["nonce-1:0"]),
            ChallengeConfig::default(),
        )
    }

    fn request() -> TransferRequest {
        TransferRequest {
            sender_user_id: Uuid::new_v4(),
            sender_account_id: "acc-a".to_string(),
            receiver_account_id: "acc-b".to_string(),
            receiver_bank_code: None,
            amount: Decimal::new(100, 0),
            description: None,
            device_fingerprint: None,
            location: None,
        }
    }

    fn assessment(challenge: ChallengeType, tier: RiskTier) -> RiskAssessment {
        RiskAssessment {
            score: 50,
            tier,
            challenge,
            reasons: vec![],
        }
    }

    #[tokio::test]
    async fn test_sms_issue_and_verify() {
        let s = setup();
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmsOtp, RiskTier::Medium))
            .await
            .unwrap();
        assert_eq!(descriptor.challenge_type, ChallengeType::SmsOtp);
        assert_eq!(s.dispatcher.sms_count(), 1);

        // The dispatched code is what verifies
        let code = s.dispatcher.last_sms_code().unwrap();
        let transfer = s
            .coordinator
            .verify(descriptor.challenge_id, ChallengeProof::Code(code))
            .await
            .unwrap();
        assert_eq!(transfer.request.sender_account_id, "acc-a");

        // OtpGenerated event enqueued, code not in the payload
        let events = s.outbox.all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::OTP_GENERATED);
        assert!(events[0].payload.get("code").is_none());
    }

    #[tokio::test]
    async fn test_wrong_codes_count_down_then_lock() {
        let s = setup();
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmsOtp, RiskTier::Medium))
            .await
            .unwrap();
        let id = descriptor.challenge_id;
        let wrong = ChallengeProof::Code("000000".to_string());

        assert!(matches!(
            s.coordinator.verify(id, wrong.clone()).await,
            Err(ChallengeError::InvalidOtp { attempts_left: 2 })
        ));
        assert!(matches!(
            s.coordinator.verify(id, wrong.clone()).await,
            Err(ChallengeError::InvalidOtp { attempts_left: 1 })
        ));
        assert!(matches!(
            s.coordinator.verify(id, wrong).await,
            Err(ChallengeError::AttemptsExhausted)
        ));
        // Locked: even the right code is gone
        assert!(matches!(
            s.coordinator
                .verify(id, ChallengeProof::Code("111111".to_string()))
                .await,
            Err(ChallengeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_smart_otp_falls_back_without_device() {
        let s = setup();
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmartOtp, RiskTier::High))
            .await
            .unwrap();
        // No enrolled device: degraded to SMS
        assert_eq!(descriptor.challenge_type, ChallengeType::SmsOtp);
        assert_eq!(s.dispatcher.sms_count(), 1);
    }

    #[tokio::test]
    async fn test_smart_otp_signature_roundtrip() {
        let s = setup();
        let (private_key, public_hex) = generate_keypair();
        let mut req = request();
        let user_id = req.sender_user_id;
        req.amount = Decimal::new(50_000, 0);

        let device = s
            .devices
            .register_device(
                user_id,
                DeviceRegistration {
                    fingerprint: "fp-1".to_string(),
                    device_name: None,
                    public_key: public_hex,
                    push_token: Some("tok-1".to_string()),
                    biometric_enabled: true,
                },
            )
            .await
            .unwrap();
        s.devices.approve_device(device.device_id).await.unwrap();

        let descriptor = s
            .coordinator
            .issue(req, &assessment(ChallengeType::SmartOtp, RiskTier::High))
            .await
            .unwrap();
        assert_eq!(descriptor.challenge_type, ChallengeType::SmartOtp);
        assert_eq!(s.dispatcher.push_count(), 1);

        // The push payload carries the nonce the device must sign
        let nonce = {
            let pushes = s.dispatcher.pushes.lock().unwrap();
            pushes[0].1["nonce"].as_str().unwrap().to_string()
        };
        let sig = sign_nonce(&private_key, &nonce);

        let transfer = s
            .coordinator
            .verify(
                descriptor.challenge_id,
                ChallengeProof::Signature {
                    signature: sig.clone(),
                    approved: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(transfer.request.sender_user_id, user_id);

        // Replay of the consumed challenge fails closed
        assert!(matches!(
            s.coordinator
                .verify(
                    descriptor.challenge_id,
                    ChallengeProof::Signature {
                        signature: sig,
                        approved: true
                    }
                )
                .await,
            Err(ChallengeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_resend_respects_cooldown_and_swaps_code() {
        let s = setup_with(
            SeqRng::new(vec!["111111", "222222"], vec![]),
            ChallengeConfig {
                resend_cooldown_secs: 0,
                ..ChallengeConfig::default()
            },
        );
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmsOtp, RiskTier::Medium))
            .await
            .unwrap();
        let id = descriptor.challenge_id;

        s.coordinator.resend(id).await.unwrap();
        assert_eq!(s.dispatcher.sms_count(), 2);

        // Old code no longer verifies, the resent one does
        assert!(matches!(
            s.coordinator
                .verify(id, ChallengeProof::Code("111111".to_string()))
                .await,
            Err(ChallengeError::InvalidOtp { .. })
        ));
        assert!(
            s.coordinator
                .verify(id, ChallengeProof::Code("222222".to_string()))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_resend_cooldown_rejects() {
        let s = setup();
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmsOtp, RiskTier::Medium))
            .await
            .unwrap();

        // Default 3s cooldown started at issue time
        assert!(matches!(
            s.coordinator.resend(descriptor.challenge_id).await,
            Err(ChallengeError::CooldownActive)
        ));
        assert_eq!(s.dispatcher.sms_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_proof_kind_rejected() {
        let s = setup();
        let descriptor = s
            .coordinator
            .issue(request(), &assessment(ChallengeType::SmsOtp, RiskTier::Medium))
            .await
            .unwrap();

        assert!(matches!(
            s.coordinator
                .verify(
                    descriptor.challenge_id,
                    ChallengeProof::Signature {
                        signature: "00".to_string(),
                        approved: true
                    }
                )
                .await,
            Err(ChallengeError::WrongProofKind)
        ));
    }
}
