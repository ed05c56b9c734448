//! Per-user transfer limits.
//!
//! Daily and monthly totals plus a per-transaction cap, checked before a
//! transaction row is created. Windows reset lazily: stored totals carry
//! the window they belong to and a check against a newer window reads
//! them as zero.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::LimitConfig;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("Amount exceeds the per-transaction cap")]
    PerTransaction,

    #[error("Daily transfer limit exceeded")]
    Daily,

    #[error("Monthly transfer limit exceeded")]
    Monthly,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Stored usage row: totals tagged with the window they were accumulated in.
#[derive(Debug, Clone, Default)]
pub struct LimitUsage {
    pub day: Option<NaiveDate>,
    pub day_total: Decimal,
    pub month: Option<NaiveDate>,
    pub month_total: Decimal,
}

#[async_trait]
pub trait LimitStore: Send + Sync {
    async fn usage(&self, user_id: Uuid) -> Result<LimitUsage, LimitError>;

    /// Add a completed transfer's amount to the user's windows.
    async fn add(&self, user_id: Uuid, amount: Decimal, at: DateTime<Utc>)
    -> Result<(), LimitError>;
}

fn month_of(date: NaiveDate) -> NaiveDate {
    // First of the month is always a valid date
    date.with_day(1).unwrap_or(date)
}

/// Limit checks over a store and the configured caps.
pub struct LimitTracker {
    store: std::sync::Arc<dyn LimitStore>,
    config: LimitConfig,
}

impl LimitTracker {
    pub fn new(store: std::sync::Arc<dyn LimitStore>, config: LimitConfig) -> Self {
        Self { store, config }
    }

    /// Would `amount` fit within all three caps right now?
    pub async fn check(
        &self,
        user_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), LimitError> {
        if amount > self.config.per_transaction {
            return Err(LimitError::PerTransaction);
        }

        let usage = self.store.usage(user_id).await?;
        let today = at.date_naive();
        let this_month = month_of(today);

        let day_total = if usage.day == Some(today) {
            usage.day_total
        } else {
            Decimal::ZERO
        };
        if day_total + amount > self.config.daily {
            return Err(LimitError::Daily);
        }

        let month_total = if usage.month == Some(this_month) {
            usage.month_total
        } else {
            Decimal::ZERO
        };
        if month_total + amount > self.config.monthly {
            return Err(LimitError::Monthly);
        }

        Ok(())
    }

    /// Record a completed transfer against the windows.
    pub async fn record(
        &self,
        user_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), LimitError> {
        self.store.add(user_id, amount, at).await
    }
}

/// PostgreSQL-backed usage store.
pub struct PgLimitStore {
    pool: PgPool,
}

impl PgLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LimitStore for PgLimitStore {
    async fn usage(&self, user_id: Uuid) -> Result<LimitUsage, LimitError> {
        let row = sqlx::query(
            r#"
            SELECT day_date, day_total, month_date, month_total
            FROM transfer_limits_tb
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => LimitUsage {
                day: r.get("day_date"),
                day_total: r.get("day_total"),
                month: r.get("month_date"),
                month_total: r.get("month_total"),
            },
            None => LimitUsage::default(),
        })
    }

    async fn add(
        &self,
        user_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), LimitError> {
        let today = at.date_naive();
        let this_month = month_of(today);

        // Upsert with in-row lazy reset: totals from an older window are
        // replaced, totals from the current window accumulate.
        sqlx::query(
            r#"
            INSERT INTO transfer_limits_tb (user_id, day_date, day_total, month_date, month_total)
            VALUES ($1, $2, $3, $4, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                day_total = CASE
                    WHEN transfer_limits_tb.day_date = EXCLUDED.day_date
                    THEN transfer_limits_tb.day_total + EXCLUDED.day_total
                    ELSE EXCLUDED.day_total
                END,
                day_date = EXCLUDED.day_date,
                month_total = CASE
                    WHEN transfer_limits_tb.month_date = EXCLUDED.month_date
                    THEN transfer_limits_tb.month_total + EXCLUDED.month_total
                    ELSE EXCLUDED.month_total
                END,
                month_date = EXCLUDED.month_date
            "#,
        )
        .bind(user_id)
        .bind(today)
        .bind(amount)
        .bind(this_month)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// In-memory usage store for simulation mode and tests.
#[derive(Default)]
pub struct MemLimitStore {
    usage: Mutex<HashMap<Uuid, LimitUsage>>,
}

impl MemLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LimitStore for MemLimitStore {
    async fn usage(&self, user_id: Uuid) -> Result<LimitUsage, LimitError> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add(
        &self,
        user_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), LimitError> {
        let today = at.date_naive();
        let this_month = month_of(today);
        let mut usage = self.usage.lock().unwrap();
        let entry = usage.entry(user_id).or_default();

        if entry.day == Some(today) {
            entry.day_total += amount;
        } else {
            entry.day = Some(today);
            entry.day_total = amount;
        }
        if entry.month == Some(this_month) {
            entry.month_total += amount;
        } else {
            entry.month = Some(this_month);
            entry.month_total = amount;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tracker(config: LimitConfig) -> LimitTracker {
        LimitTracker::new(Arc::new(MemLimitStore::new()), config)
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_per_transaction_cap() {
        let t = tracker(LimitConfig {
            per_transaction: dec("500"),
            daily: dec("10000"),
            monthly: dec("100000"),
        });
        let user = Uuid::new_v4();

        assert!(t.check(user, dec("500"), at(2025, 6, 15)).await.is_ok());
        assert!(matches!(
            t.check(user, dec("500.01"), at(2025, 6, 15)).await,
            Err(LimitError::PerTransaction)
        ));
    }

    #[tokio::test]
    async fn test_daily_limit_accumulates_and_resets() {
        let t = tracker(LimitConfig {
            per_transaction: dec("1000"),
            daily: dec("1000"),
            monthly: dec("100000"),
        });
        let user = Uuid::new_v4();

        t.record(user, dec("800"), at(2025, 6, 15)).await.unwrap();
        assert!(t.check(user, dec("200"), at(2025, 6, 15)).await.is_ok());
        assert!(matches!(
            t.check(user, dec("201"), at(2025, 6, 15)).await,
            Err(LimitError::Daily)
        ));

        // Next day: window resets lazily
        assert!(t.check(user, dec("1000"), at(2025, 6, 16)).await.is_ok());
    }

    #[tokio::test]
    async fn test_monthly_limit_spans_days() {
        let t = tracker(LimitConfig {
            per_transaction: dec("10000"),
            daily: dec("10000"),
            monthly: dec("15000"),
        });
        let user = Uuid::new_v4();

        t.record(user, dec("8000"), at(2025, 6, 1)).await.unwrap();
        t.record(user, dec("6000"), at(2025, 6, 20)).await.unwrap();

        assert!(matches!(
            t.check(user, dec("1001"), at(2025, 6, 25)).await,
            Err(LimitError::Monthly)
        ));
        // New month resets
        assert!(t.check(user, dec("10000"), at(2025, 7, 1)).await.is_ok());
    }
}
