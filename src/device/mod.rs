//! Device trust store and Smart-OTP.
//!
//! Devices enroll an Ed25519 public key; trusted, biometric-capable ones
//! carry Smart-OTP challenges. A challenge is a server nonce the device
//! signs after the user approves on-screen; the signature verifies against
//! the stored key. Challenges are single-use: any terminal outcome closes
//! them for good and the caller must request a fresh one.

pub mod repo;
pub mod signature;
pub mod types;

pub use repo::{DeviceRepo, MemDeviceRepo, PgDeviceRepo};
pub use types::{ChallengeStatus, SmartOtpChallenge, UserDevice};

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChallengeConfig;
use crate::notify::NotificationDispatcher;
use crate::rng::SecureRng;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("An active device with this fingerprint is already registered")]
    DuplicateDevice,

    #[error("Public key is not a well-formed Ed25519 key")]
    InvalidPublicKey,

    #[error("Device not found: {0}")]
    DeviceNotFound(Uuid),

    #[error("Device does not belong to the caller")]
    NotOwner,

    #[error("Challenge not found or no longer pending: {0}")]
    ChallengeNotFound(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Registration payload after API-level validation.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub fingerprint: String,
    pub device_name: Option<String>,
    /// Hex-encoded Ed25519 public key
    pub public_key: String,
    pub push_token: Option<String>,
    pub biometric_enabled: bool,
}

/// Result of asking for a Smart-OTP challenge.
#[derive(Debug, Clone)]
pub enum SmartChallengeOutcome {
    Issued(SmartOtpChallenge),
    /// No eligible device; the caller should degrade to SMS
    FallbackToSms,
}

/// Result of verifying a Smart-OTP response. All three are terminal for
/// the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartVerifyOutcome {
    Approved,
    /// User declined on the device; fail closed
    Rejected,
    /// Signature did not verify against the device key
    InvalidSignature,
}

pub struct DeviceTrustStore {
    repo: Arc<dyn DeviceRepo>,
    notifier: Arc<dyn NotificationDispatcher>,
    rng: Arc<dyn SecureRng>,
    config: ChallengeConfig,
}

impl DeviceTrustStore {
    pub fn new(
        repo: Arc<dyn DeviceRepo>,
        notifier: Arc<dyn NotificationDispatcher>,
        rng: Arc<dyn SecureRng>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            repo,
            notifier,
            rng,
            config,
        }
    }

    /// Enroll a device. New devices start untrusted; approval is a
    /// separate step so possession of the API alone never mints a
    /// Smart-OTP-capable device.
    pub async fn register_device(
        &self,
        user_id: Uuid,
        registration: DeviceRegistration,
    ) -> Result<UserDevice, DeviceError> {
        let Some(public_key) = signature::parse_public_key(&registration.public_key) else {
            return Err(DeviceError::InvalidPublicKey);
        };

        if self
            .repo
            .active_by_fingerprint(user_id, &registration.fingerprint)
            .await?
            .is_some()
        {
            return Err(DeviceError::DuplicateDevice);
        }

        let device = UserDevice {
            device_id: Uuid::new_v4(),
            user_id,
            fingerprint: registration.fingerprint,
            device_name: registration.device_name,
            public_key: public_key.to_vec(),
            push_token: registration.push_token,
            trusted: false,
            biometric_enabled: registration.biometric_enabled,
            revoked: false,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.repo.insert_device(&device).await?;

        info!(device_id = %device.device_id, user_id = %user_id, "Device registered (untrusted)");
        Ok(device)
    }

    /// Mark a device trusted. Exposed through the ops/approval surface,
    /// not the regular user API.
    pub async fn approve_device(&self, device_id: Uuid) -> Result<(), DeviceError> {
        self.repo.set_trusted(device_id, true).await?;
        info!(device_id = %device_id, "Device approved as trusted");
        Ok(())
    }

    pub async fn list_devices(&self, user_id: Uuid) -> Result<Vec<UserDevice>, DeviceError> {
        self.repo.devices_for_user(user_id).await
    }

    /// Owner-only revocation; the device drops out of Smart-OTP selection
    /// immediately.
    pub async fn revoke_device(&self, user_id: Uuid, device_id: Uuid) -> Result<(), DeviceError> {
        let device = self
            .repo
            .get_device(device_id)
            .await?
            .ok_or(DeviceError::DeviceNotFound(device_id))?;
        if device.user_id != user_id {
            return Err(DeviceError::NotOwner);
        }
        self.repo.set_revoked(device_id).await?;
        info!(device_id = %device_id, user_id = %user_id, "Device revoked");
        Ok(())
    }

    /// Issue a Smart-OTP challenge on the user's most-recently-used
    /// eligible device. No device means fallback, not failure.
    pub async fn create_challenge(
        &self,
        user_id: Uuid,
        context: Value,
    ) -> Result<SmartChallengeOutcome, DeviceError> {
        let Some(device) = self.repo.most_recent_eligible(user_id).await? else {
            debug!(user_id = %user_id, "No Smart-OTP-eligible device, falling back to SMS");
            return Ok(SmartChallengeOutcome::FallbackToSms);
        };

        let now = Utc::now();
        let challenge = SmartOtpChallenge {
            challenge_id: Uuid::new_v4(),
            user_id,
            device_id: device.device_id,
            nonce: self.rng.challenge_nonce(),
            context: context.clone(),
            status: ChallengeStatus::Pending,
            signature: None,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.smart_otp_expiry_secs as i64),
        };
        self.repo.insert_challenge(&challenge).await?;

        // Eligibility guarantees a push token
        if let Some(token) = &device.push_token {
            let payload = json!({
                "challenge_id": challenge.challenge_id.to_string(),
                "nonce": challenge.nonce,
                "context": context,
                "expires_at": challenge.expires_at.to_rfc3339(),
            });
            if let Err(e) = self.notifier.send_push_challenge(token, &payload).await {
                // The challenge stands; the app can still fetch it by id
                warn!(challenge_id = %challenge.challenge_id, error = %e, "Push dispatch failed");
            }
        }

        info!(
            challenge_id = %challenge.challenge_id,
            device_id = %device.device_id,
            "Smart-OTP challenge issued"
        );
        Ok(SmartChallengeOutcome::Issued(challenge))
    }

    /// Verify a device's response. Exactly one verification consumes the
    /// challenge: concurrent calls race on the PENDING transition and the
    /// loser sees ChallengeNotFound.
    pub async fn verify(
        &self,
        challenge_id: Uuid,
        signature_hex: &str,
        approved: bool,
    ) -> Result<SmartVerifyOutcome, DeviceError> {
        let challenge = self
            .repo
            .get_challenge(challenge_id)
            .await?
            .ok_or(DeviceError::ChallengeNotFound(challenge_id))?;

        if challenge.status.is_terminal() {
            return Err(DeviceError::ChallengeNotFound(challenge_id));
        }
        if challenge.is_expired(Utc::now()) {
            self.repo
                .transition_challenge(
                    challenge_id,
                    ChallengeStatus::Pending,
                    ChallengeStatus::Expired,
                    None,
                )
                .await?;
            return Err(DeviceError::ChallengeNotFound(challenge_id));
        }

        if !approved {
            if !self
                .repo
                .transition_challenge(
                    challenge_id,
                    ChallengeStatus::Pending,
                    ChallengeStatus::Rejected,
                    None,
                )
                .await?
            {
                return Err(DeviceError::ChallengeNotFound(challenge_id));
            }
            info!(challenge_id = %challenge_id, "Smart-OTP challenge rejected by user");
            return Ok(SmartVerifyOutcome::Rejected);
        }

        let device = self
            .repo
            .get_device(challenge.device_id)
            .await?
            .ok_or(DeviceError::DeviceNotFound(challenge.device_id))?;

        let valid =
            signature::verify_nonce_signature(&device.public_key, &challenge.nonce, signature_hex);
        let (to, outcome) = if valid {
            (ChallengeStatus::Approved, SmartVerifyOutcome::Approved)
        } else {
            (ChallengeStatus::Invalid, SmartVerifyOutcome::InvalidSignature)
        };

        if !self
            .repo
            .transition_challenge(challenge_id, ChallengeStatus::Pending, to, Some(signature_hex))
            .await?
        {
            return Err(DeviceError::ChallengeNotFound(challenge_id));
        }

        if valid {
            self.repo.touch_last_used(device.device_id).await?;
            info!(challenge_id = %challenge_id, device_id = %device.device_id, "Smart-OTP approved");
        } else {
            warn!(challenge_id = %challenge_id, "Smart-OTP signature invalid");
        }
        Ok(outcome)
    }

    /// Terminalize expired PENDING challenges. Run by the expiry sweep.
    pub async fn expire_stale(&self) -> Result<u64, DeviceError> {
        let count = self.repo.expire_stale(Utc::now()).await?;
        if count > 0 {
            debug!(count, "Expired stale Smart-OTP challenges");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::signature::testing::{generate_keypair, sign_nonce};
    use super::*;
    use crate::notify::testing::RecordingDispatcher;
    use crate::rng::testing::SeqRng;

    struct Setup {
        store: DeviceTrustStore,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn setup() -> Setup {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let store = DeviceTrustStore::new(
            Arc::new(MemDeviceRepo::new()),
            dispatcher.clone(),
            Arc::new(SeqRng::new(vec![], vec!["nonce-1:0", "nonce-2:0"])),
            ChallengeConfig::default(),
        );
        Setup { store, dispatcher }
    }

    fn registration(public_key: &str) -> DeviceRegistration {
        DeviceRegistration {
            fingerprint: "fp-1".to_string(),
            device_name: Some("Pixel 9".to_string()),
            public_key: public_key.to_string(),
            push_token: Some("tok-1".to_string()),
            biometric_enabled: true,
        }
    }

    async fn enrolled_trusted_device(setup: &Setup) -> ([u8; 32], Uuid, Uuid) {
        let (private_key, public_hex) = generate_keypair();
        let user_id = Uuid::new_v4();
        let device = setup
            .store
            .register_device(user_id, registration(&public_hex))
            .await
            .unwrap();
        setup.store.approve_device(device.device_id).await.unwrap();
        (private_key, user_id, device.device_id)
    }

    #[tokio::test]
    async fn test_register_without_name_is_valid() {
        let s = setup();
        let (_, public_hex) = generate_keypair();
        let user_id = Uuid::new_v4();
        let device = s
            .store
            .register_device(
                user_id,
                DeviceRegistration {
                    device_name: None,
                    ..registration(&public_hex)
                },
            )
            .await
            .unwrap();
        assert!(device.device_name.is_none());

        let listed = s.store.list_devices(user_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].device_name.is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_key_and_duplicate() {
        let s = setup();
        let user_id = Uuid::new_v4();

        assert!(matches!(
            s.store.register_device(user_id, registration("zz")).await,
            Err(DeviceError::InvalidPublicKey)
        ));

        let (_, public_hex) = generate_keypair();
        let device = s
            .store
            .register_device(user_id, registration(&public_hex))
            .await
            .unwrap();
        assert!(!device.trusted);

        assert!(matches!(
            s.store
                .register_device(user_id, registration(&public_hex))
                .await,
            Err(DeviceError::DuplicateDevice)
        ));

        // Revoking frees the fingerprint for re-enrollment
        s.store
            .revoke_device(user_id, device.device_id)
            .await
            .unwrap();
        assert!(
            s.store
                .register_device(user_id, registration(&public_hex))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_untrusted_device_falls_back_to_sms() {
        let s = setup();
        let user_id = Uuid::new_v4();
        let (_, public_hex) = generate_keypair();
        s.store
            .register_device(user_id, registration(&public_hex))
            .await
            .unwrap();

        // Registered but never approved: no eligible device
        let outcome = s.store.create_challenge(user_id, json!({})).await.unwrap();
        assert!(matches!(outcome, SmartChallengeOutcome::FallbackToSms));
        assert_eq!(s.dispatcher.push_count(), 0);
    }

    #[tokio::test]
    async fn test_approve_sign_verify_roundtrip() {
        let s = setup();
        let (private_key, user_id, _) = enrolled_trusted_device(&s).await;

        let outcome = s
            .store
            .create_challenge(user_id, json!({"amount": "100"}))
            .await
            .unwrap();
        let SmartChallengeOutcome::Issued(challenge) = outcome else {
            panic!("expected an issued challenge");
        };
        assert_eq!(s.dispatcher.push_count(), 1);

        let sig = sign_nonce(&private_key, &challenge.nonce);
        let result = s.store.verify(challenge.challenge_id, &sig, true).await.unwrap();
        assert_eq!(result, SmartVerifyOutcome::Approved);

        // Consumed: same challenge id verifies NOT_FOUND from here on
        assert!(matches!(
            s.store.verify(challenge.challenge_id, &sig, true).await,
            Err(DeviceError::ChallengeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_rejection_is_terminal() {
        let s = setup();
        let (private_key, user_id, _) = enrolled_trusted_device(&s).await;

        let SmartChallengeOutcome::Issued(challenge) =
            s.store.create_challenge(user_id, json!({})).await.unwrap()
        else {
            panic!("expected an issued challenge");
        };

        let result = s.store.verify(challenge.challenge_id, "", false).await.unwrap();
        assert_eq!(result, SmartVerifyOutcome::Rejected);

        // A valid signature afterwards cannot resurrect it
        let sig = sign_nonce(&private_key, &challenge.nonce);
        assert!(matches!(
            s.store.verify(challenge.challenge_id, &sig, true).await,
            Err(DeviceError::ChallengeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_signature_is_terminal() {
        let s = setup();
        let (private_key, user_id, _) = enrolled_trusted_device(&s).await;

        let SmartChallengeOutcome::Issued(challenge) =
            s.store.create_challenge(user_id, json!({})).await.unwrap()
        else {
            panic!("expected an issued challenge");
        };

        // Signed the wrong nonce
        let bad_sig = sign_nonce(&private_key, "some-other-nonce");
        let result = s
            .store
            .verify(challenge.challenge_id, &bad_sig, true)
            .await
            .unwrap();
        assert_eq!(result, SmartVerifyOutcome::InvalidSignature);

        // Terminal: the correct signature needs a fresh challenge
        let good_sig = sign_nonce(&private_key, &challenge.nonce);
        assert!(matches!(
            s.store.verify(challenge.challenge_id, &good_sig, true).await,
            Err(DeviceError::ChallengeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_enforces_ownership() {
        let s = setup();
        let (_, user_id, device_id) = enrolled_trusted_device(&s).await;

        assert!(matches!(
            s.store.revoke_device(Uuid::new_v4(), device_id).await,
            Err(DeviceError::NotOwner)
        ));
        s.store.revoke_device(user_id, device_id).await.unwrap();

        // Revoked device drops out of selection
        let outcome = s.store.create_challenge(user_id, json!({})).await.unwrap();
        assert!(matches!(outcome, SmartChallengeOutcome::FallbackToSms));
    }

    #[tokio::test]
    async fn test_expire_stale_terminalizes_pending() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let store = DeviceTrustStore::new(
            Arc::new(MemDeviceRepo::new()),
            dispatcher,
            Arc::new(SeqRng::new(vec![], vec!["n:0"])),
            ChallengeConfig {
                smart_otp_expiry_secs: 0,
                ..ChallengeConfig::default()
            },
        );
        let s = Setup {
            store,
            dispatcher: Arc::new(RecordingDispatcher::new()),
        };
        let (private_key, user_id, _) = enrolled_trusted_device(&s).await;

        let SmartChallengeOutcome::Issued(challenge) =
            s.store.create_challenge(user_id, json!({})).await.unwrap()
        else {
            panic!("expected an issued challenge");
        };

        assert_eq!(s.store.expire_stale().await.unwrap(), 1);
        // Second sweep finds nothing pending
        assert_eq!(s.store.expire_stale().await.unwrap(), 0);

        let sig = sign_nonce(&private_key, &challenge.nonce);
        assert!(matches!(
            s.store.verify(challenge.challenge_id, &sig, true).await,
            Err(DeviceError::ChallengeNotFound(_))
        ));
    }
}
