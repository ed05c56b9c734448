//! Additive risk scoring.
//!
//! Each factor contributes a fixed weight; the sum maps to a tier and the
//! tier to a required challenge. Scoring is a pure function of the input,
//! the fetched profile, the configuration and the evaluation instant.

use chrono::{DateTime, Timelike, Utc};

use crate::config::RiskConfig;

use super::types::{RiskAssessment, RiskInput, RiskTier};
use super::profile::RiskProfile;

// Factor weights
const WEIGHT_HIGH_AMOUNT: u32 = 40;
const WEIGHT_UNUSUAL_TIME: u32 = 30;
const WEIGHT_UNKNOWN_DEVICE: u32 = 25;
const WEIGHT_UNKNOWN_LOCATION: u32 = 20;
const WEIGHT_UNKNOWN_PAYEE: u32 = 15;
const WEIGHT_HIGH_VELOCITY: u32 = 10;

// Tier cutoffs
const HIGH_CUTOFF: u32 = 70;
const MEDIUM_CUTOFF: u32 = 40;

// Local hours [start, end) considered unusual
const UNUSUAL_HOUR_START: u32 = 2;
const UNUSUAL_HOUR_END: u32 = 6;

/// The scorer. Cheap to clone; holds only configuration.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Score one proposed transfer.
    ///
    /// A missing or blank device fingerprint counts as an unknown device:
    /// a client that cannot identify itself gets no benefit of the doubt.
    pub fn assess(
        &self,
        input: &RiskInput,
        profile: &RiskProfile,
        at: DateTime<Utc>,
    ) -> RiskAssessment {
        let mut score: u32 = 0;
        let mut reasons: Vec<&'static str> = Vec::new();

        if input.amount > self.config.high_amount_threshold {
            score += WEIGHT_HIGH_AMOUNT;
            reasons.push("HIGH_AMOUNT");
        }

        let hour = at.hour();
        if (UNUSUAL_HOUR_START..UNUSUAL_HOUR_END).contains(&hour) {
            score += WEIGHT_UNUSUAL_TIME;
            reasons.push("UNUSUAL_TIME");
        }

        let device_known = match input.device_fingerprint.as_deref() {
            Some(fp) if !fp.trim().is_empty() => profile.knows_device(fp),
            _ => false,
        };
        if !device_known {
            score += WEIGHT_UNKNOWN_DEVICE;
            reasons.push("UNKNOWN_DEVICE");
        }

        if let Some(location) = input.location.as_deref()
            && !location.trim().is_empty()
            && !profile.knows_location(location)
        {
            score += WEIGHT_UNKNOWN_LOCATION;
            reasons.push("UNKNOWN_LOCATION");
        }

        if let Some(payee) = input.payee_id.as_deref()
            && !payee.trim().is_empty()
            && !profile.knows_payee(payee)
        {
            score += WEIGHT_UNKNOWN_PAYEE;
            reasons.push("UNKNOWN_PAYEE");
        }

        if self.config.velocity_enabled && profile.recent_transfers > self.config.velocity_threshold
        {
            score += WEIGHT_HIGH_VELOCITY;
            reasons.push("HIGH_VELOCITY");
        }

        let tier = tier_for(score);

        RiskAssessment {
            score,
            tier,
            challenge: tier.challenge_type(),
            reasons,
        }
    }
}

fn tier_for(score: u32) -> RiskTier {
    if score >= HIGH_CUTOFF {
        RiskTier::High
    } else if score >= MEDIUM_CUTOFF {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}
