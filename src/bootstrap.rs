use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    execution::{HttpLedgerClient, LedgerClient, LedgerRouter, SimulatedLedgerClient},
    ledger::{models::Currency, InMemoryPayoutStore, PayoutStore, PgPayoutStore},
    queue::manager::PayoutQueueManager,
    settlement::scheduler::DrainScheduler,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Persistence
    let store: Arc<dyn PayoutStore> = match &config.database_url {
        Some(database_url) => {
            let pool = initialize_database(database_url).await?;
            Arc::new(PgPayoutStore::new(pool))
        }
        None => {
            warn!("⚠️  No database configured - payout queue state is in memory only");
            Arc::new(InMemoryPayoutStore::new())
        }
    };

    // Ledger clients
    info!("⚙️  Initializing ledger clients...");
    let ledger_router = Arc::new(initialize_ledger(config)?);
    info!(
        "🔗 Ledger router initialized with currencies: {:?}",
        ledger_router.registered_currencies()
    );

    // Queue
    let manager = Arc::new(PayoutQueueManager::new(
        store,
        ledger_router,
        &config.queue,
        config.ledger.timeout(),
    ));
    manager.restore_clock().await?;
    info!("✅ Payout queue manager initialized");

    // Repair anything a previous run left half-finished before taking traffic
    let report = manager.reconcile().await?;
    if !report.repaired.is_empty() {
        warn!("Repaired {} requests left in processing", report.repaired.len());
    }

    if config.drain.enabled {
        DrainScheduler::new(config.drain.clone(), manager.clone()).start();
        info!(
            "✅ Drain scheduler started (every {}s, reconcile every {}s)",
            config.drain.interval_secs, config.drain.reconcile_interval_secs
        );
    } else {
        info!("Drain scheduler disabled - drains run only on request");
    }

    Ok(AppState { manager })
}

fn initialize_ledger(config: &Config) -> AppResult<LedgerRouter> {
    let mut router = LedgerRouter::new();

    match &config.ledger.url {
        Some(url) => {
            let client: Arc<dyn LedgerClient> =
                Arc::new(HttpLedgerClient::new(url.clone(), config.ledger.timeout())?);
            for currency in Currency::all() {
                router.register_client(currency, client.clone());
            }
            info!("✅ HTTP ledger client registered for {}", url);
        }
        None => {
            warn!("⚠️  No ledger URL configured - using the simulated ledger");
            let client: Arc<dyn LedgerClient> = Arc::new(SimulatedLedgerClient::new(
                config.ledger.simulated_balances.clone(),
            ));
            for currency in config.ledger.simulated_balances.keys() {
                router.register_client(*currency, client.clone());
            }
        }
    }

    Ok(router)
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
