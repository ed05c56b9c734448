//! End-to-end transfer scenarios over the in-memory stack.
//!
//! Same wiring as simulation mode: in-memory ledger, transaction store
//! and outbox, the simulated settlement rail, and real risk scoring over
//! seeded profiles.

use std::str::FromStr;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;
use uuid::Uuid;

use riskgate::audit::AuditLog;
use riskgate::banks::BankRegistry;
use riskgate::challenge::{ChallengeCoordinator, ChallengeError, ChallengeProof, PendingStore};
use riskgate::config::{ChallengeConfig, FeeConfig, LimitConfig, OutboxConfig, RiskConfig};
use riskgate::device::{
    DeviceRegistration, DeviceTrustStore, MemDeviceRepo, SmartChallengeOutcome, SmartVerifyOutcome,
};
use riskgate::fees::FeeSchedule;
use riskgate::ledger::MemLedger;
use riskgate::limits::{LimitTracker, MemLimitStore};
use riskgate::notify::TracingDispatcher;
use riskgate::outbox::{EventStatus, MemOutboxStore, OutboxPublisher, TracingBus, event_types};
use riskgate::risk::{ChallengeType, MemProfileStore, RiskEngine, RiskProfile};
use riskgate::rng::OsSecureRng;
use riskgate::saga::{
    MemTransactionStore, SagaStep, TransferError, TransferOutcome, TransferRequest, TransferSaga,
};
use riskgate::settlement::{SettlementStatus, SimSettlementGateway};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn alice() -> Uuid {
    Uuid::from_u128(0xA11CE)
}

fn bob() -> Uuid {
    Uuid::from_u128(0xB0B)
}

struct Stack {
    saga: TransferSaga,
    ledger: Arc<MemLedger>,
    outbox: Arc<MemOutboxStore>,
    devices: Arc<DeviceTrustStore>,
    profiles: Arc<MemProfileStore>,
}

fn stack_with(limits: LimitConfig) -> Stack {
    let ledger = Arc::new(MemLedger::new());
    ledger.open_account("acc-alice", alice(), dec("1000"));
    ledger.open_account("acc-bob", bob(), dec("500"));

    let outbox = Arc::new(MemOutboxStore::new());
    let store = Arc::new(MemTransactionStore::new(outbox.clone()));
    let profiles = Arc::new(MemProfileStore::new());

    let notifier = Arc::new(TracingDispatcher);
    let rng = Arc::new(OsSecureRng);
    let devices = Arc::new(DeviceTrustStore::new(
        Arc::new(MemDeviceRepo::new()),
        notifier.clone(),
        rng.clone(),
        ChallengeConfig::default(),
    ));
    let challenges = Arc::new(ChallengeCoordinator::new(
        Arc::new(PendingStore::new()),
        devices.clone(),
        notifier,
        rng,
        outbox.clone(),
        ChallengeConfig::default(),
    ));

    let saga = TransferSaga::new(
        ledger.clone(),
        store,
        RiskEngine::new(RiskConfig::default()),
        profiles.clone(),
        challenges,
        Arc::new(SimSettlementGateway),
        Arc::new(BankRegistry::with_defaults()),
        FeeSchedule::new(&FeeConfig::default()),
        Arc::new(LimitTracker::new(Arc::new(MemLimitStore::new()), limits)),
        Arc::new(AuditLog::new(None)),
    );

    Stack {
        saga,
        ledger,
        outbox,
        devices,
        profiles,
    }
}

fn stack() -> Stack {
    stack_with(LimitConfig::default())
}

/// Alice's history knows everything the requests below reference, so the
/// score stays LOW at any hour of the day.
fn seed_trusting_profile(profiles: &MemProfileStore) {
    let mut profile = RiskProfile::default();
    profile.known_devices.insert("fp-1".to_string());
    profile.known_locations.insert("Hanoi".to_string());
    profile.known_payees.insert("acc-bob".to_string());
    profile.known_payees.insert("EXT-9".to_string());
    profiles.put(alice(), profile);
}

fn internal_request(amount: &str) -> TransferRequest {
    TransferRequest {
        sender_user_id: alice(),
        sender_account_id: "acc-alice".to_string(),
        receiver_account_id: "acc-bob".to_string(),
        receiver_bank_code: None,
        amount: dec(amount),
        description: Some("rent".to_string()),
        device_fingerprint: Some("fp-1".to_string()),
        location: Some("Hanoi".to_string()),
    }
}

fn external_request(amount: &str) -> TransferRequest {
    TransferRequest {
        sender_user_id: alice(),
        sender_account_id: "acc-alice".to_string(),
        receiver_account_id: "EXT-9".to_string(),
        receiver_bank_code: Some("VCB".to_string()),
        amount: dec(amount),
        description: None,
        device_fingerprint: Some("fp-1".to_string()),
        location: Some("Hanoi".to_string()),
    }
}

fn accepted(outcome: TransferOutcome) -> riskgate::saga::Transaction {
    match outcome {
        TransferOutcome::Accepted(tx) => tx,
        TransferOutcome::ChallengeRequired(desc) => {
            panic!("expected acceptance, got challenge {:?}", desc)
        }
    }
}

fn event_names(outbox: &MemOutboxStore) -> Vec<String> {
    outbox.all().into_iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn test_internal_transfer_end_to_end() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    let tx = accepted(s.saga.create_transfer(internal_request("100")).await.unwrap());
    assert_eq!(tx.step, SagaStep::Completed);
    assert_eq!(tx.fee, Decimal::ZERO);

    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("900")));
    assert_eq!(s.ledger.balance_of("acc-bob"), Some(dec("600")));

    assert_eq!(
        event_names(&s.outbox),
        vec![
            event_types::TRANSFER_INITIATED.to_string(),
            event_types::TRANSFER_COMPLETED.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_outbox_publisher_drains_events() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    accepted(s.saga.create_transfer(internal_request("50")).await.unwrap());
    assert!(
        s.outbox
            .all()
            .iter()
            .all(|e| e.status == EventStatus::Pending)
    );

    let publisher = OutboxPublisher::new(
        s.outbox.clone(),
        Arc::new(TracingBus),
        OutboxConfig::default(),
    );
    let published = publisher.sweep_once().await.unwrap();
    assert_eq!(published, 2);

    assert!(
        s.outbox
            .all()
            .iter()
            .all(|e| e.status == EventStatus::Completed)
    );

    // Nothing left to publish on the next pass
    assert_eq!(publisher.sweep_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_external_transfer_settles_on_resume() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    let tx = accepted(s.saga.create_transfer(external_request("200")).await.unwrap());
    // Simulated rail accepts and reports PROCESSING: saga suspends
    assert_eq!(tx.step, SagaStep::ExternalInitiated);
    assert_eq!(tx.fee, dec("5.00"));
    assert!(tx.external_ref.as_deref().unwrap().starts_with("SIM-"));
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("795.00")));

    // The timeout sweep polls the rail, which reports completion
    let resumed = s.saga.resume(tx).await.unwrap();
    assert_eq!(resumed.step, SagaStep::Completed);
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("795.00")));

    let names = event_names(&s.outbox);
    assert!(names.contains(&event_types::SETTLEMENT_REQUESTED.to_string()));
    assert!(names.contains(&event_types::TRANSFER_COMPLETED.to_string()));
}

#[tokio::test]
async fn test_settlement_callback_completes_and_duplicates_converge() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    let tx = accepted(s.saga.create_transfer(external_request("200")).await.unwrap());

    let done = s
        .saga
        .handle_settlement_callback(tx.idempotency_key, SettlementStatus::Completed)
        .await
        .unwrap();
    assert_eq!(done.step, SagaStep::Completed);

    // A late contradictory callback is a no-op against the terminal saga
    let replay = s
        .saga
        .handle_settlement_callback(tx.idempotency_key, SettlementStatus::Failed)
        .await
        .unwrap();
    assert_eq!(replay.step, SagaStep::Completed);
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("795.00")));
}

#[tokio::test]
async fn test_failed_settlement_refunds_amount_plus_fee() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    let tx = accepted(s.saga.create_transfer(external_request("200")).await.unwrap());
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("795.00")));

    let failed = s
        .saga
        .handle_settlement_callback(tx.idempotency_key, SettlementStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed.step, SagaStep::RollbackCompleted);
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("1000.00")));

    let names = event_names(&s.outbox);
    assert!(names.contains(&event_types::REFUND_COMPLETED.to_string()));
    assert!(names.contains(&event_types::TRANSFER_FAILED.to_string()));
}

#[tokio::test]
async fn test_unknown_profile_parks_transfer_behind_otp() {
    let s = stack();
    // No profile seeded: device, location and payee all count unknown

    let outcome = s
        .saga
        .create_transfer(internal_request("100"))
        .await
        .unwrap();
    let desc = match outcome {
        TransferOutcome::ChallengeRequired(desc) => desc,
        TransferOutcome::Accepted(tx) => panic!("expected challenge, got {}", tx),
    };
    // No device enrolled, so even a HIGH score degrades to SMS
    assert_eq!(desc.challenge_type, ChallengeType::SmsOtp);

    // Nothing durable happened
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("1000")));
    assert_eq!(
        event_names(&s.outbox),
        vec![event_types::OTP_GENERATED.to_string()]
    );

    // A wrong code burns an attempt without releasing the transfer
    let err = s
        .saga
        .verify_challenge(desc.challenge_id, ChallengeProof::Code("x".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Challenge(ChallengeError::InvalidOtp { attempts_left: 2 })
    ));

    // Immediate resend is inside the cooldown window
    assert!(matches!(
        s.saga.resend_challenge(desc.challenge_id).await,
        Err(TransferError::Challenge(ChallengeError::CooldownActive))
    ));
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("1000")));
}

#[tokio::test]
async fn test_daily_limit_blocks_second_transfer() {
    let s = stack_with(LimitConfig {
        per_transaction: dec("500"),
        daily: dec("600"),
        monthly: dec("10000"),
    });
    seed_trusting_profile(&s.profiles);

    accepted(s.saga.create_transfer(internal_request("400")).await.unwrap());
    let err = s
        .saga
        .create_transfer(internal_request("400"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::LimitExceeded(_)));

    // Only the first transfer moved money
    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("600")));
    assert_eq!(s.ledger.balance_of("acc-bob"), Some(dec("900")));
}

#[tokio::test]
async fn test_insufficient_funds_rejected_before_anything_durable() {
    let s = stack();
    seed_trusting_profile(&s.profiles);

    let err = s
        .saga
        .create_transfer(internal_request("5000"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InsufficientFunds));

    assert_eq!(s.ledger.balance_of("acc-alice"), Some(dec("1000")));
    assert!(s.outbox.all().is_empty());
}

#[tokio::test]
async fn test_device_enrollment_and_smart_otp_roundtrip() {
    let s = stack();
    let user = alice();

    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let public_hex = hex::encode(signing_key.verifying_key().as_bytes());

    let device = s
        .devices
        .register_device(
            user,
            DeviceRegistration {
                fingerprint: "fp-phone".to_string(),
                device_name: Some("Pixel 9".to_string()),
                public_key: public_hex,
                push_token: Some("tok-1".to_string()),
                biometric_enabled: true,
            },
        )
        .await
        .unwrap();
    assert!(!device.trusted);

    // Untrusted devices cannot carry Smart-OTP challenges
    let fallback = s
        .devices
        .create_challenge(user, serde_json::json!({"amount": "100"}))
        .await
        .unwrap();
    assert!(matches!(fallback, SmartChallengeOutcome::FallbackToSms));

    s.devices.approve_device(device.device_id).await.unwrap();
    let challenge = match s
        .devices
        .create_challenge(user, serde_json::json!({"amount": "100"}))
        .await
        .unwrap()
    {
        SmartChallengeOutcome::Issued(challenge) => challenge,
        SmartChallengeOutcome::FallbackToSms => panic!("expected issued challenge"),
    };

    let signature = hex::encode(signing_key.sign(challenge.nonce.as_bytes()).to_bytes());
    let outcome = s
        .devices
        .verify(challenge.challenge_id, &signature, true)
        .await
        .unwrap();
    assert_eq!(outcome, SmartVerifyOutcome::Approved);

    // A consumed challenge is gone
    assert!(
        s.devices
            .verify(challenge.challenge_id, &signature, true)
            .await
            .is_err()
    );

    // Revocation takes the device out of the Smart-OTP pool
    s.devices
        .revoke_device(user, device.device_id)
        .await
        .unwrap();
    let after_revoke = s
        .devices
        .create_challenge(user, serde_json::json!({"amount": "100"}))
        .await
        .unwrap();
    assert!(matches!(after_revoke, SmartChallengeOutcome::FallbackToSms));
}
