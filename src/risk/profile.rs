//! Risk profile capability.
//!
//! What the scorer knows about a user: devices, locations and payees seen
//! before, plus a recent-transfer count for the velocity factor.

use async_trait::async_trait;
use cached::proc_macro::cached;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Known-good history for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskProfile {
    pub known_devices: HashSet<String>,
    pub known_locations: HashSet<String>,
    pub known_payees: HashSet<String>,
    /// Completed transfers in the velocity window
    pub recent_transfers: u32,
}

impl RiskProfile {
    pub fn knows_device(&self, fingerprint: &str) -> bool {
        self.known_devices.contains(fingerprint)
    }

    pub fn knows_location(&self, location: &str) -> bool {
        self.known_locations.contains(location)
    }

    pub fn knows_payee(&self, payee_id: &str) -> bool {
        self.known_payees.contains(payee_id)
    }
}

/// Profile lookup seam. Production reads Postgres; tests script profiles.
#[async_trait]
pub trait RiskProfileStore: Send + Sync {
    async fn risk_profile(&self, user_id: Uuid) -> Result<RiskProfile, String>;
}

/// Postgres-backed profile store with a short-TTL read cache.
pub struct PgRiskProfileStore {
    pool: Arc<PgPool>,
}

impl PgRiskProfileStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskProfileStore for PgRiskProfileStore {
    async fn risk_profile(&self, user_id: Uuid) -> Result<RiskProfile, String> {
        load_risk_profile_cached(self.pool.clone(), user_id).await
    }
}

/// Load a user's risk profile with caching.
///
/// Profiles move slowly; 30 seconds staleness is acceptable and keeps the
/// scorer off the hot path of the profile tables.
#[cached(
    time = 30,
    key = "String",
    convert = r#"{ user_id.to_string() }"#,
    result = true
)]
pub async fn load_risk_profile_cached(
    pool: Arc<PgPool>,
    user_id: Uuid,
) -> Result<RiskProfile, String> {
    tracing::debug!(user_id = %user_id, "[cache] Loading risk profile from database");

    let rows = sqlx::query(
        r#"
        SELECT kind, value
        FROM risk_profile_entries_tb
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool.as_ref())
    .await
    .map_err(|e| format!("Failed to load risk profile: {}", e))?;

    let mut profile = RiskProfile::default();
    for row in rows {
        let kind: String = row.get("kind");
        let value: String = row.get("value");
        match kind.as_str() {
            "DEVICE" => {
                profile.known_devices.insert(value);
            }
            "LOCATION" => {
                profile.known_locations.insert(value);
            }
            "PAYEE" => {
                profile.known_payees.insert(value);
            }
            other => {
                tracing::warn!(kind = other, "Unknown risk profile entry kind");
            }
        }
    }

    // Velocity counter: completed transfers in the last hour
    let recent: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM transactions_tb
        WHERE sender_user_id = $1
          AND created_at > NOW() - INTERVAL '1 hour'
        "#,
    )
    .bind(user_id)
    .fetch_one(pool.as_ref())
    .await
    .map_err(|e| format!("Failed to count recent transfers: {}", e))?;

    profile.recent_transfers = recent.max(0) as u32;

    Ok(profile)
}

/// In-memory profile store. Backs simulation mode, where no Postgres is
/// available and every user starts with an empty history.
#[derive(Default)]
pub struct MemProfileStore {
    profiles: dashmap::DashMap<Uuid, RiskProfile>,
}

impl MemProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, user_id: Uuid, profile: RiskProfile) {
        self.profiles.insert(user_id, profile);
    }
}

#[async_trait]
impl RiskProfileStore for MemProfileStore {
    async fn risk_profile(&self, user_id: Uuid) -> Result<RiskProfile, String> {
        Ok(self
            .profiles
            .get(&user_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_membership() {
        let mut profile = RiskProfile::default();
        profile.known_devices.insert("device-123".to_string());
        profile.known_locations.insert("Hanoi".to_string());

        assert!(profile.knows_device("device-123"));
        assert!(!profile.knows_device("device-999"));
        assert!(profile.knows_location("Hanoi"));
        assert!(!profile.knows_payee("payee-001"));
    }
}
