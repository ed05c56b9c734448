//! Riskgate service entry point.
//!
//! Wires the transfer saga, challenge coordinator and background workers
//! together and starts the HTTP gateway. Runs against Postgres when
//! `postgres_url` is configured, otherwise in simulation mode on
//! in-memory stores with accounts seeded from `demo_accounts`.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{error, info, warn};

use riskgate::audit::AuditLog;
use riskgate::banks::BankRegistry;
use riskgate::challenge::{ChallengeCoordinator, PendingStore};
use riskgate::config::AppConfig;
use riskgate::device::{DeviceRepo, DeviceTrustStore, MemDeviceRepo, PgDeviceRepo};
use riskgate::fees::FeeSchedule;
use riskgate::gateway::{self, AppState};
use riskgate::ledger::{LedgerService, MemLedger, PgLedger};
use riskgate::limits::{LimitStore, LimitTracker, MemLimitStore, PgLimitStore};
use riskgate::notify::TracingDispatcher;
use riskgate::outbox::{MemOutboxStore, OutboxPublisher, OutboxStore, PgOutboxStore, TracingBus};
use riskgate::risk::{MemProfileStore, PgRiskProfileStore, RiskEngine, RiskProfileStore};
use riskgate::rng::OsSecureRng;
use riskgate::saga::{
    MemTransactionStore, PgTransactionStore, SettlementSweep, TransactionStore, TransferSaga,
};
use riskgate::settlement::{HttpSettlementGateway, SettlementGateway, SimSettlementGateway};

/// Get environment from command line (--env or -e argument)
fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn connect_pool(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("PostgreSQL connection pool established");
    Ok(pool)
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = riskgate::logging::init_logging(&config);

    info!("Starting riskgate in {} mode", env);

    // [SECURITY] Loud reminder that mock endpoints are compiled in.
    #[cfg(feature = "mock-api")]
    warn!("mock-api feature enabled - /internal/mock endpoints are live");

    let pool = match &config.postgres_url {
        Some(url) => match connect_pool(url).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                error!(error = %e, "Failed to connect to PostgreSQL");
                std::process::exit(1);
            }
        },
        None => {
            warn!("No postgres_url configured - simulation mode with in-memory stores");
            None
        }
    };

    let banks = Arc::new(match &config.banks {
        Some(cfg) => BankRegistry::new(cfg.home_code.clone(), cfg.external.clone()),
        None => BankRegistry::with_defaults(),
    });

    let ledger: Arc<dyn LedgerService>;
    let tx_store: Arc<dyn TransactionStore>;
    let outbox_store: Arc<dyn OutboxStore>;
    let device_repo: Arc<dyn DeviceRepo>;
    let limit_store: Arc<dyn LimitStore>;
    let profiles: Arc<dyn RiskProfileStore>;
    let settlement: Arc<dyn SettlementGateway>;

    match &pool {
        Some(pool) => {
            ledger = Arc::new(PgLedger::new(pool.clone()));
            tx_store = Arc::new(PgTransactionStore::new(pool.clone()));
            outbox_store = Arc::new(PgOutboxStore::new(pool.clone()));
            device_repo = Arc::new(PgDeviceRepo::new(pool.clone()));
            limit_store = Arc::new(PgLimitStore::new(pool.clone()));
            profiles = Arc::new(PgRiskProfileStore::new(Arc::new(pool.clone())));
            settlement = match HttpSettlementGateway::new(&config.settlement) {
                Ok(gateway) => Arc::new(gateway),
                Err(e) => {
                    error!(error = %e, "Failed to build settlement gateway client");
                    std::process::exit(1);
                }
            };
        }
        None => {
            let mem_ledger = MemLedger::new();
            for account in &config.demo_accounts {
                mem_ledger.open_account(
                    &account.account_id,
                    account.owner_user_id,
                    account.balance,
                );
                info!(
                    account_id = %account.account_id,
                    balance = %account.balance,
                    "Seeded demo account"
                );
            }
            let mem_outbox = Arc::new(MemOutboxStore::new());
            ledger = Arc::new(mem_ledger);
            tx_store = Arc::new(MemTransactionStore::new(mem_outbox.clone()));
            outbox_store = mem_outbox;
            device_repo = Arc::new(MemDeviceRepo::new());
            limit_store = Arc::new(MemLimitStore::new());
            profiles = Arc::new(MemProfileStore::new());
            settlement = Arc::new(SimSettlementGateway);
        }
    }

    let audit = Arc::new(AuditLog::new(pool.clone()));
    let notifier = Arc::new(TracingDispatcher);
    let rng = Arc::new(OsSecureRng);

    let devices = Arc::new(DeviceTrustStore::new(
        device_repo,
        notifier.clone(),
        rng.clone(),
        config.challenge.clone(),
    ));
    let challenges = Arc::new(ChallengeCoordinator::new(
        Arc::new(PendingStore::new()),
        devices.clone(),
        notifier,
        rng,
        outbox_store.clone(),
        config.challenge.clone(),
    ));
    let limits = Arc::new(LimitTracker::new(limit_store, config.limits.clone()));

    let saga = Arc::new(TransferSaga::new(
        ledger,
        tx_store,
        RiskEngine::new(config.risk.clone()),
        profiles,
        challenges.clone(),
        settlement,
        banks.clone(),
        FeeSchedule::new(&config.fees),
        limits,
        audit,
    ));

    // Outbox publisher: drains NEW/retryable events to the message bus.
    let publisher = OutboxPublisher::new(outbox_store, Arc::new(TracingBus), config.outbox.clone());
    tokio::spawn(async move { publisher.run().await });

    // Settlement sweep: resumes sagas stuck mid-settlement.
    let sweep = SettlementSweep::new(saga.clone(), config.settlement.clone());
    tokio::spawn(async move { sweep.run().await });

    // Expiry sweep: drops timed-out pending challenges and Smart-OTP tickets.
    {
        let challenges = challenges.clone();
        let devices = devices.clone();
        let period = Duration::from_secs(config.challenge.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let purged = challenges.purge_expired();
                if purged > 0 {
                    info!(purged, "Purged expired pending challenges");
                }
                match devices.expire_stale().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "Expired stale Smart-OTP challenges"),
                    Err(e) => warn!(error = %e, "Smart-OTP expiry sweep failed"),
                }
            }
        });
    }

    let state = Arc::new(AppState::new(saga, devices, banks));
    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, state).await;
}
