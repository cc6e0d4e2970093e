use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use crate::{
    config::Config,
    error::AppResult,
    ledger::LedgerRepository,
    settlement::{SettlementEngine, SettlementScheduler},
};

pub async fn initialize_scheduler(config: &Config) -> AppResult<SettlementScheduler> {
    info!("Initializing settlement components ...");

    // Database pool
    let pool = initialize_database(&config.database_url, config.db_max_connections).await?;

    // Core components
    let ledger = Arc::new(LedgerRepository::new(pool));

    let settlement_config = config.settlement()?;
    info!(
        "✅ Settlement engine configured: platform rate {}, schedule offset {}",
        settlement_config.platform_rate, settlement_config.schedule_offset
    );
    let engine = Arc::new(SettlementEngine::new(
        ledger.clone(),
        ledger.clone(),
        settlement_config,
    ));

    let schedule = config.schedule();
    info!(
        "✅ Settlement scheduler configured: every {}s",
        schedule.interval.as_secs()
    );

    Ok(SettlementScheduler::new(schedule, ledger, engine))
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
