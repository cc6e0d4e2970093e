mod bootstrap;
mod config;
mod error;
mod ledger;
mod settlement;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{error, info};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,settler=debug,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    info!("🚀 Starting Commitment Settlement Service");

    let config = config::Config::from_env()?;

    let scheduler = bootstrap::initialize_scheduler(&config).await?;
    let handle = scheduler.start();

    info!("⏰ Settlement scheduler started");

    tokio::select! {
        result = handle => {
            if let Err(e) = result {
                error!("❌ Settlement scheduler stopped unexpectedly: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    Ok(())
}
