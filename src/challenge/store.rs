//! In-memory pending-transfer store.
//!
//! Challenge-gated transfers park here until verified; nothing durable
//! exists for them yet, so losing this map on crash only loses pre-debit
//! challenges. Entries expire by TTL and are consumed by removal, which
//! the map makes atomic: under concurrent verification exactly one caller
//! gets the entry, every other caller observes not-found.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use uuid::Uuid;

use crate::risk::{ChallengeType, RiskTier};
use crate::saga::TransferRequest;

/// Consumed view of a pending entry, handed to the saga on success.
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub request: TransferRequest,
    pub tier: RiskTier,
    pub challenge: ChallengeType,
    /// Present for SMART_OTP entries: the durable challenge to verify against
    pub smart_challenge_id: Option<Uuid>,
}

struct Slot {
    request: TransferRequest,
    tier: RiskTier,
    challenge: ChallengeType,
    smart_challenge_id: Option<Uuid>,
    /// Current SMS code; replaced on resend
    code: Mutex<Option<String>>,
    /// Wrong-code attempts so far
    attempts: AtomicU32,
    /// Last OTP send, unix millis; resend cooldown CAS-es on this
    last_sent_ms: AtomicI64,
    expires_at: DateTime<Utc>,
}

impl Slot {
    fn view(&self) -> PendingTransfer {
        PendingTransfer {
            request: self.request.clone(),
            tier: self.tier,
            challenge: self.challenge,
            smart_challenge_id: self.smart_challenge_id,
        }
    }
}

/// Outcome of an SMS code check.
#[derive(Debug)]
pub enum CodeCheck {
    /// Code matched; the entry is consumed and returned
    Match(Box<PendingTransfer>),
    /// Wrong code; the entry stays for another attempt
    Mismatch { attempts_left: u32 },
    /// Attempt cap hit; the entry is gone
    LockedOut,
    /// Unknown, expired, or already consumed
    NotFound,
}

/// Outcome of a resend request.
#[derive(Debug, PartialEq, Eq)]
pub enum ResendCheck {
    Accepted,
    /// Last send was under the cooldown ago
    CooldownActive,
    /// Entry is not an SMS challenge
    NotSms,
    NotFound,
}

pub struct PendingStore {
    slots: DashMap<Uuid, Slot>,
}

impl Default for PendingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Park a transfer behind a challenge for `ttl`.
    pub fn insert(
        &self,
        challenge_id: Uuid,
        request: TransferRequest,
        tier: RiskTier,
        challenge: ChallengeType,
        sms_code: Option<String>,
        smart_challenge_id: Option<Uuid>,
        ttl: Duration,
    ) {
        let now = Utc::now();
        self.slots.insert(
            challenge_id,
            Slot {
                request,
                tier,
                challenge,
                smart_challenge_id,
                code: Mutex::new(sms_code),
                attempts: AtomicU32::new(0),
                last_sent_ms: AtomicI64::new(now.timestamp_millis()),
                expires_at: now + ttl,
            },
        );
    }

    /// Non-consuming read, used to route Smart-OTP proofs.
    pub fn peek(&self, challenge_id: Uuid) -> Option<PendingTransfer> {
        let slot = self.slots.get(&challenge_id)?;
        if slot.expires_at <= Utc::now() {
            drop(slot);
            self.slots.remove(&challenge_id);
            return None;
        }
        Some(slot.view())
    }

    /// Consume an entry unconditionally. At most one caller gets Some.
    pub fn take(&self, challenge_id: Uuid) -> Option<PendingTransfer> {
        let (_, slot) = self.slots.remove(&challenge_id)?;
        if slot.expires_at <= Utc::now() {
            return None;
        }
        Some(slot.view())
    }

    /// Check an SMS code. A match consumes the entry; the removal is the
    /// arbiter when two correct codes race, so only one gets Match.
    pub fn check_code(&self, challenge_id: Uuid, code: &str, max_attempts: u32) -> CodeCheck {
        enum Verdict {
            Matched,
            Wrong(u32),
            Expired,
        }

        let verdict = {
            let Some(slot) = self.slots.get(&challenge_id) else {
                return CodeCheck::NotFound;
            };
            if slot.expires_at <= Utc::now() {
                Verdict::Expired
            } else if slot
                .code
                .lock()
                .unwrap()
                .as_deref()
                .is_some_and(|stored| stored == code)
            {
                Verdict::Matched
            } else {
                Verdict::Wrong(slot.attempts.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };
        // Shard guard dropped; removal below cannot deadlock

        match verdict {
            Verdict::Expired => {
                self.slots.remove(&challenge_id);
                CodeCheck::NotFound
            }
            Verdict::Matched => match self.take(challenge_id) {
                Some(transfer) => CodeCheck::Match(Box::new(transfer)),
                None => CodeCheck::NotFound,
            },
            Verdict::Wrong(attempts) if attempts >= max_attempts => {
                self.slots.remove(&challenge_id);
                CodeCheck::LockedOut
            }
            Verdict::Wrong(attempts) => CodeCheck::Mismatch {
                attempts_left: max_attempts - attempts,
            },
        }
    }

    /// Install a fresh SMS code if the cooldown has passed. The CAS on the
    /// send timestamp makes concurrent resends admit exactly one.
    pub fn replace_code(&self, challenge_id: Uuid, new_code: &str, cooldown: Duration) -> ResendCheck {
        let Some(slot) = self.slots.get(&challenge_id) else {
            return ResendCheck::NotFound;
        };
        let now = Utc::now();
        if slot.expires_at <= now {
            drop(slot);
            self.slots.remove(&challenge_id);
            return ResendCheck::NotFound;
        }
        if slot.challenge != ChallengeType::SmsOtp {
            return ResendCheck::NotSms;
        }

        let now_ms = now.timestamp_millis();
        let last = slot.last_sent_ms.load(Ordering::SeqCst);
        if now_ms - last < cooldown.num_milliseconds()
            || slot
                .last_sent_ms
                .compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return ResendCheck::CooldownActive;
        }

        *slot.code.lock().unwrap() = Some(new_code.to_string());
        ResendCheck::Accepted
    }

    /// Drop entries past their TTL. Returns how many were purged.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.expires_at > now);
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

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

    fn store_with_sms(code: &str, ttl: Duration) -> (PendingStore, Uuid) {
        let store = PendingStore::new();
        let id = Uuid::new_v4();
        store.insert(
            id,
            request(),
            RiskTier::Medium,
            ChallengeType::SmsOtp,
            Some(code.to_string()),
            None,
            ttl,
        );
        (store, id)
    }

    #[test]
    fn test_correct_code_consumes_entry() {
        let (store, id) = store_with_sms("123456", Duration::minutes(5));

        assert!(matches!(
            store.check_code(id, "123456", 3),
            CodeCheck::Match(_)
        ));
        // Consumed: replay sees nothing
        assert!(matches!(store.check_code(id, "123456", 3), CodeCheck::NotFound));
    }

    #[test]
    fn test_three_wrong_codes_lock_out() {
        let (store, id) = store_with_sms("123456", Duration::minutes(5));

        assert!(matches!(
            store.check_code(id, "000000", 3),
            CodeCheck::Mismatch { attempts_left: 2 }
        ));
        assert!(matches!(
            store.check_code(id, "000000", 3),
            CodeCheck::Mismatch { attempts_left: 1 }
        ));
        assert!(matches!(store.check_code(id, "000000", 3), CodeCheck::LockedOut));
        // Locked out entry is gone, even for the right code
        assert!(matches!(store.check_code(id, "123456", 3), CodeCheck::NotFound));
    }

    #[test]
    fn test_expired_entry_not_found() {
        let (store, id) = store_with_sms("123456", Duration::seconds(-1));
        assert!(matches!(store.check_code(id, "123456", 3), CodeCheck::NotFound));
        assert!(store.is_empty());
    }

    #[test]
    fn test_resend_cooldown() {
        let (store, id) = store_with_sms("111111", Duration::minutes(5));

        // Inserted just now: still inside the cooldown
        assert_eq!(
            store.replace_code(id, "222222", Duration::seconds(3)),
            ResendCheck::CooldownActive
        );
        // Zero cooldown: accepted, code replaced, attempts preserved
        store.check_code(id, "999999", 3);
        assert_eq!(
            store.replace_code(id, "222222", Duration::zero()),
            ResendCheck::Accepted
        );
        assert!(matches!(
            store.check_code(id, "111111", 3),
            CodeCheck::Mismatch { attempts_left: 1 }
        ));
        assert!(matches!(store.check_code(id, "222222", 3), CodeCheck::Match(_)));
    }

    #[test]
    fn test_resend_rejects_smart_otp_entries() {
        let store = PendingStore::new();
        let id = Uuid::new_v4();
        store.insert(
            id,
            request(),
            RiskTier::High,
            ChallengeType::SmartOtp,
            None,
            Some(Uuid::new_v4()),
            Duration::minutes(5),
        );
        assert_eq!(
            store.replace_code(id, "123456", Duration::zero()),
            ResendCheck::NotSms
        );
    }

    #[test]
    fn test_take_is_single_winner() {
        let (store, id) = store_with_sms("123456", Duration::minutes(5));
        assert!(store.take(id).is_some());
        assert!(store.take(id).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = PendingStore::new();
        let live = Uuid::new_v4();
        let dead = Uuid::new_v4();
        store.insert(
            live,
            request(),
            RiskTier::Medium,
            ChallengeType::SmsOtp,
            Some("1".to_string()),
            None,
            Duration::minutes(5),
        );
        store.insert(
            dead,
            request(),
            RiskTier::Medium,
            ChallengeType::SmsOtp,
            Some("2".to_string()),
            None,
            Duration::seconds(-1),
        );

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.peek(live).is_some());
    }
}
