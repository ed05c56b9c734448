//! Device and Smart-OTP challenge persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::DeviceError;
use super::types::{ChallengeStatus, SmartOtpChallenge, UserDevice};

#[async_trait]
pub trait DeviceRepo: Send + Sync {
    async fn insert_device(&self, device: &UserDevice) -> Result<(), DeviceError>;

    /// Active (non-revoked) device with this fingerprint, if any.
    async fn active_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>, DeviceError>;

    async fn get_device(&self, device_id: Uuid) -> Result<Option<UserDevice>, DeviceError>;

    async fn devices_for_user(&self, user_id: Uuid) -> Result<Vec<UserDevice>, DeviceError>;

    /// Most-recently-used Smart-OTP-eligible device for the user.
    async fn most_recent_eligible(&self, user_id: Uuid)
    -> Result<Option<UserDevice>, DeviceError>;

    async fn set_trusted(&self, device_id: Uuid, trusted: bool) -> Result<(), DeviceError>;

    async fn set_revoked(&self, device_id: Uuid) -> Result<(), DeviceError>;

    async fn touch_last_used(&self, device_id: Uuid) -> Result<(), DeviceError>;

    async fn insert_challenge(&self, challenge: &SmartOtpChallenge) -> Result<(), DeviceError>;

    async fn get_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<SmartOtpChallenge>, DeviceError>;

    /// CAS transition from `expected` to `to`, optionally recording the
    /// signature. Returns false when another caller won the race.
    async fn transition_challenge(
        &self,
        challenge_id: Uuid,
        expected: ChallengeStatus,
        to: ChallengeStatus,
        signature: Option<&str>,
    ) -> Result<bool, DeviceError>;

    /// Terminalize PENDING challenges past expiry. Returns the count.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DeviceError>;
}

// === PostgreSQL ===

pub struct PgDeviceRepo {
    pool: PgPool,
}

impl PgDeviceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_device(row: &sqlx::postgres::PgRow) -> UserDevice {
        UserDevice {
            device_id: row.get("device_id"),
            user_id: row.get("user_id"),
            fingerprint: row.get("fingerprint"),
            device_name: row.get("device_name"),
            public_key: row.get("public_key"),
            push_token: row.get("push_token"),
            trusted: row.get("trusted"),
            biometric_enabled: row.get("biometric_enabled"),
            revoked: row.get("revoked"),
            last_used_at: row.get("last_used_at"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_challenge(row: &sqlx::postgres::PgRow) -> Result<SmartOtpChallenge, DeviceError> {
        let status_id: i16 = row.get("status");
        let status = ChallengeStatus::from_id(status_id).ok_or_else(|| {
            DeviceError::DatabaseError(sqlx::Error::Decode(
                format!("Invalid challenge status: {}", status_id).into(),
            ))
        })?;
        let context: Value = row.get("context");

        Ok(SmartOtpChallenge {
            challenge_id: row.get("challenge_id"),
            user_id: row.get("user_id"),
            device_id: row.get("device_id"),
            nonce: row.get("nonce"),
            context,
            status,
            signature: row.get("signature"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

const DEVICE_COLUMNS: &str = "device_id, user_id, fingerprint, device_name, public_key, \
     push_token, trusted, biometric_enabled, revoked, last_used_at, created_at";

const CHALLENGE_COLUMNS: &str = "challenge_id, user_id, device_id, nonce, context, status, \
     signature, created_at, expires_at";

#[async_trait]
impl DeviceRepo for PgDeviceRepo {
    async fn insert_device(&self, device: &UserDevice) -> Result<(), DeviceError> {
        sqlx::query(
            r#"
            INSERT INTO user_devices_tb
                (device_id, user_id, fingerprint, device_name, public_key,
                 push_token, trusted, biometric_enabled, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(device.device_id)
        .bind(device.user_id)
        .bind(&device.fingerprint)
        .bind(&device.device_name)
        .bind(&device.public_key)
        .bind(&device.push_token)
        .bind(device.trusted)
        .bind(device.biometric_enabled)
        .bind(device.revoked)
        .bind(device.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>, DeviceError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DEVICE_COLUMNS} FROM user_devices_tb
            WHERE user_id = $1 AND fingerprint = $2 AND revoked = FALSE
            "#
        ))
        .bind(user_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_device))
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<UserDevice>, DeviceError> {
        let row = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM user_devices_tb WHERE device_id = $1"
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_device))
    }

    async fn devices_for_user(&self, user_id: Uuid) -> Result<Vec<UserDevice>, DeviceError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DEVICE_COLUMNS} FROM user_devices_tb
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_device).collect())
    }

    async fn most_recent_eligible(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserDevice>, DeviceError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {DEVICE_COLUMNS} FROM user_devices_tb
            WHERE user_id = $1
              AND trusted = TRUE
              AND biometric_enabled = TRUE
              AND revoked = FALSE
              AND push_token IS NOT NULL
            ORDER BY last_used_at DESC NULLS LAST, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_device))
    }

    async fn set_trusted(&self, device_id: Uuid, trusted: bool) -> Result<(), DeviceError> {
        let result = sqlx::query("UPDATE user_devices_tb SET trusted = $1 WHERE device_id = $2")
            .bind(trusted)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DeviceError::DeviceNotFound(device_id));
        }
        Ok(())
    }

    async fn set_revoked(&self, device_id: Uuid) -> Result<(), DeviceError> {
        let result = sqlx::query("UPDATE user_devices_tb SET revoked = TRUE WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DeviceError::DeviceNotFound(device_id));
        }
        Ok(())
    }

    async fn touch_last_used(&self, device_id: Uuid) -> Result<(), DeviceError> {
        sqlx::query("UPDATE user_devices_tb SET last_used_at = NOW() WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_challenge(&self, challenge: &SmartOtpChallenge) -> Result<(), DeviceError> {
        sqlx::query(
            r#"
            INSERT INTO smart_otp_challenges_tb
                (challenge_id, user_id, device_id, nonce, context, status,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(challenge.user_id)
        .bind(challenge.device_id)
        .bind(&challenge.nonce)
        .bind(&challenge.context)
        .bind(challenge.status.id())
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<SmartOtpChallenge>, DeviceError> {
        let row = sqlx::query(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM smart_otp_challenges_tb WHERE challenge_id = $1"
        ))
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_challenge).transpose()
    }

    async fn transition_challenge(
        &self,
        challenge_id: Uuid,
        expected: ChallengeStatus,
        to: ChallengeStatus,
        signature: Option<&str>,
    ) -> Result<bool, DeviceError> {
        let result = sqlx::query(
            r#"
            UPDATE smart_otp_challenges_tb
            SET status = $1, signature = COALESCE($2, signature)
            WHERE challenge_id = $3 AND status = $4
            "#,
        )
        .bind(to.id())
        .bind(signature)
        .bind(challenge_id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DeviceError> {
        let result = sqlx::query(
            r#"
            UPDATE smart_otp_challenges_tb
            SET status = $1
            WHERE status = $2 AND expires_at <= $3
            "#,
        )
        .bind(ChallengeStatus::Expired.id())
        .bind(ChallengeStatus::Pending.id())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// === In-memory ===

/// In-memory repo for simulation mode and tests.
#[derive(Default)]
pub struct MemDeviceRepo {
    devices: Mutex<HashMap<Uuid, UserDevice>>,
    challenges: Mutex<HashMap<Uuid, SmartOtpChallenge>>,
}

impl MemDeviceRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRepo for MemDeviceRepo {
    async fn insert_device(&self, device: &UserDevice) -> Result<(), DeviceError> {
        self.devices
            .lock()
            .unwrap()
            .insert(device.device_id, device.clone());
        Ok(())
    }

    async fn active_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<UserDevice>, DeviceError> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .values()
            .find(|d| d.user_id == user_id && d.fingerprint == fingerprint && !d.revoked)
            .cloned())
    }

    async fn get_device(&self, device_id: Uuid) -> Result<Option<UserDevice>, DeviceError> {
        Ok(self.devices.lock().unwrap().get(&device_id).cloned())
    }

    async fn devices_for_user(&self, user_id: Uuid) -> Result<Vec<UserDevice>, DeviceError> {
        let mut devices: Vec<UserDevice> = self
            .devices
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(devices)
    }

    async fn most_recent_eligible(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserDevice>, DeviceError> {
        let devices = self.devices.lock().unwrap();
        let mut eligible: Vec<&UserDevice> = devices
            .values()
            .filter(|d| d.user_id == user_id && d.eligible_for_smart_otp())
            .collect();
        eligible.sort_by(|a, b| {
            b.last_used_at
                .cmp(&a.last_used_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(eligible.first().map(|d| (*d).clone()))
    }

    async fn set_trusted(&self, device_id: Uuid, trusted: bool) -> Result<(), DeviceError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .get_mut(&device_id)
            .ok_or(DeviceError::DeviceNotFound(device_id))?;
        device.trusted = trusted;
        Ok(())
    }

    async fn set_revoked(&self, device_id: Uuid) -> Result<(), DeviceError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .get_mut(&device_id)
            .ok_or(DeviceError::DeviceNotFound(device_id))?;
        device.revoked = true;
        Ok(())
    }

    async fn touch_last_used(&self, device_id: Uuid) -> Result<(), DeviceError> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(&device_id) {
            device.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_challenge(&self, challenge: &SmartOtpChallenge) -> Result<(), DeviceError> {
        self.challenges
            .lock()
            .unwrap()
            .insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn get_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<SmartOtpChallenge>, DeviceError> {
        Ok(self.challenges.lock().unwrap().get(&challenge_id).cloned())
    }

    async fn transition_challenge(
        &self,
        challenge_id: Uuid,
        expected: ChallengeStatus,
        to: ChallengeStatus,
        signature: Option<&str>,
    ) -> Result<bool, DeviceError> {
        let mut challenges = self.challenges.lock().unwrap();
        match challenges.get_mut(&challenge_id) {
            Some(c) if c.status == expected => {
                c.status = to;
                if let Some(sig) = signature {
                    c.signature = Some(sig.to_string());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DeviceError> {
        let mut challenges = self.challenges.lock().unwrap();
        let mut count = 0;
        for c in challenges.values_mut() {
            if c.status == ChallengeStatus::Pending && c.is_expired(now) {
                c.status = ChallengeStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }
}
