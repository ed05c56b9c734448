//! Risk Engine
//!
//! Pure additive scoring over a fetched risk profile. The engine itself has
//! no side effects; profile loading lives behind [`RiskProfileStore`].

pub mod engine;
pub mod profile;
pub mod types;

pub use engine::RiskEngine;
pub use profile::{MemProfileStore, PgRiskProfileStore, RiskProfile, RiskProfileStore};
pub use types::{ChallengeType, RiskAssessment, RiskInput, RiskTier};
