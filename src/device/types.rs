//! Device trust and Smart-OTP challenge types.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// An enrolled device holding a signing keypair client-side.
///
/// Only the public key is stored here; the private key never leaves the
/// device. New registrations start untrusted and become Smart-OTP capable
/// through a separate approval step.
#[derive(Debug, Clone)]
pub struct UserDevice {
    pub device_id: Uuid,
    pub user_id: Uuid,
    /// Client-reported hardware fingerprint, unique per active device
    pub fingerprint: String,
    pub device_name: Option<String>,
    /// Raw Ed25519 public key (32 bytes)
    pub public_key: Vec<u8>,
    pub push_token: Option<String>,
    pub trusted: bool,
    pub biometric_enabled: bool,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserDevice {
    /// A device can carry Smart-OTP challenges only when it is trusted,
    /// biometric-capable, not revoked, and reachable by push.
    pub fn eligible_for_smart_otp(&self) -> bool {
        self.trusted && self.biometric_enabled && !self.revoked && self.push_token.is_some()
    }
}

/// Lifecycle of a Smart-OTP challenge. PENDING is the only non-terminal
/// state; once a challenge leaves it, it never comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ChallengeStatus {
    Pending = 0,
    /// Signature verified, user approved
    Approved = 10,
    /// User explicitly declined on the device
    Rejected = -10,
    /// Expiry passed before a verification arrived
    Expired = -20,
    /// Signature did not verify
    Invalid = -30,
}

impl ChallengeStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ChallengeStatus::Pending),
            10 => Some(ChallengeStatus::Approved),
            -10 => Some(ChallengeStatus::Rejected),
            -20 => Some(ChallengeStatus::Expired),
            -30 => Some(ChallengeStatus::Invalid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "PENDING",
            ChallengeStatus::Approved => "APPROVED",
            ChallengeStatus::Rejected => "REJECTED",
            ChallengeStatus::Expired => "EXPIRED",
            ChallengeStatus::Invalid => "INVALID",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        *self != ChallengeStatus::Pending
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One issued Smart-OTP challenge: the device must sign `nonce` to approve.
#[derive(Debug, Clone)]
pub struct SmartOtpChallenge {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    /// Random nonce the device signs; carries its issue timestamp
    pub nonce: String,
    /// What the user is approving (amount, receiver), shown on-device
    pub context: Value,
    pub status: ChallengeStatus,
    /// Hex signature recorded on approval
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SmartOtpChallenge {
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
