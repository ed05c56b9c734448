use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL (transactions, devices, outbox, ledger)
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    /// Bank registry; absent means the built-in default registry
    #[serde(default)]
    pub banks: Option<BanksConfig>,
    /// Accounts seeded into the in-memory ledger when running without Postgres
    #[serde(default)]
    pub demo_accounts: Vec<DemoAccountConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BanksConfig {
    pub home_code: String,
    #[serde(default)]
    pub external: Vec<crate::banks::BankEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DemoAccountConfig {
    pub account_id: String,
    pub owner_user_id: uuid::Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Risk engine tunables. Weights are fixed by the scoring model; the
/// amount threshold and the velocity factor are deployment-specific.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RiskConfig {
    /// Amounts strictly above this add the high-amount weight
    pub high_amount_threshold: Decimal,
    /// Velocity factor on/off switch
    pub velocity_enabled: bool,
    /// Recent-transfer count above which the velocity weight applies
    pub velocity_threshold: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_amount_threshold: Decimal::new(10_000, 0),
            velocity_enabled: true,
            velocity_threshold: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChallengeConfig {
    /// Pending transfer TTL in seconds (SMS and Smart-OTP)
    pub pending_ttl_secs: u64,
    /// Smart-OTP challenge expiry in seconds
    pub smart_otp_expiry_secs: u64,
    /// Max wrong-code attempts before lockout
    pub max_attempts: u32,
    /// Minimum gap between OTP sends for one challenge
    pub resend_cooldown_secs: u64,
    /// Expiry sweep interval in seconds
    pub sweep_interval_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 300,
            smart_otp_expiry_secs: 120,
            max_attempts: 3,
            resend_cooldown_secs: 3,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxConfig {
    /// Sweep interval in seconds
    pub sweep_interval_secs: u64,
    /// FAILED events younger than this are not retried yet
    pub retry_delay_secs: u64,
    /// Retries after which an event stays FAILED for manual remediation
    pub max_retries: i32,
    /// Max events per sweep
    pub batch_size: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            retry_delay_secs: 300,
            max_retries: 3,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Base URL of the settlement gateway
    pub gateway_url: String,
    /// HTTP timeout per gateway call in seconds
    pub request_timeout_secs: u64,
    /// Sagas stuck in EXTERNAL_INITIATED longer than this get polled
    pub stuck_threshold_secs: u64,
    /// Timeout sweep interval in seconds
    pub sweep_interval_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 10,
            stuck_threshold_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeeConfig {
    /// Flat fee for transfers inside the home bank
    pub internal_flat: Decimal,
    /// Flat fee for interbank transfers
    pub external_flat: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            internal_flat: Decimal::ZERO,
            external_flat: Decimal::new(500, 2), // 5.00
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LimitConfig {
    pub per_transaction: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            per_transaction: Decimal::new(50_000, 0),
            daily: Decimal::new(100_000, 0),
            monthly: Decimal::new(1_000_000, 0),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
