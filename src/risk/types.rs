//! Risk scoring types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Risk tier derived from the additive score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        }
    }

    /// Step-up authentication required at this tier.
    pub fn challenge_type(&self) -> ChallengeType {
        match self {
            RiskTier::Low => ChallengeType::None,
            RiskTier::Medium => ChallengeType::SmsOtp,
            RiskTier::High => ChallengeType::SmartOtp,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authentication challenge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    None,
    SmsOtp,
    SmartOtp,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::None => "NONE",
            ChallengeType::SmsOtp => "SMS_OTP",
            ChallengeType::SmartOtp => "SMART_OTP",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signals scored for one proposed transfer.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub user_id: Uuid,
    pub amount: Decimal,
    /// Destination identifier (account or registered payee id)
    pub payee_id: Option<String>,
    /// Device fingerprint as reported by the client; may be absent or blank
    pub device_fingerprint: Option<String>,
    /// Coarse location as reported by the client
    pub location: Option<String>,
}

/// Scoring outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub score: u32,
    pub tier: RiskTier,
    pub challenge: ChallengeType,
    /// Factor names that contributed, in scoring order
    pub reasons: Vec<&'static str>,
}

impl RiskAssessment {
    pub fn requires_challenge(&self) -> bool {
        self.challenge != ChallengeType::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_to_challenge_mapping() {
        assert_eq!(RiskTier::Low.challenge_type(), ChallengeType::None);
        assert_eq!(RiskTier::Medium.challenge_type(), ChallengeType::SmsOtp);
        assert_eq!(RiskTier::High.challenge_type(), ChallengeType::SmartOtp);
    }

    #[test]
    fn test_display() {
        assert_eq!(RiskTier::High.to_string(), "HIGH");
        assert_eq!(ChallengeType::SmsOtp.to_string(), "SMS_OTP");
        assert_eq!(ChallengeType::SmartOtp.to_string(), "SMART_OTP");
    }
}
