// Settlement Scheduler - batch driver for ended activities
//
// Cadence (default every 3 hours, aligned to 00:00/03:00/06:00... UTC):
// - Fetch every activity whose end time has passed and is still unsettled
// - Settle them one at a time
// - A failing activity is logged and left unsettled; the next tick retries it
//
// No retry scheduling beyond the next tick: settle only ever claims unsettled activities,
// so re-running a tick is harmless.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ledger::store::SettlementStore;
use crate::settlement::engine::SettlementEngine;

/// Settlement schedule configuration
#[derive(Debug, Clone)]
pub struct SettlementScheduleConfig {
    /// Time between two batches
    pub interval: Duration,
    /// Wait for the next interval boundary (UTC) before the first batch
    pub align_to_boundary: bool,
}

impl Default for SettlementScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3 * 3600),
            align_to_boundary: true,
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub found: usize,
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Settlement scheduler - drives the engine over every due activity
pub struct SettlementScheduler {
    config: SettlementScheduleConfig,
    store: Arc<dyn SettlementStore>,
    engine: Arc<SettlementEngine>,
}

impl SettlementScheduler {
    pub fn new(
        config: SettlementScheduleConfig,
        store: Arc<dyn SettlementStore>,
        engine: Arc<SettlementEngine>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }

    /// Start the settlement scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let store = self.store.clone();
        let engine = self.engine.clone();

        tokio::spawn(async move { Self::run_scheduler(&config, store.as_ref(), &engine).await })
    }

    async fn run_scheduler(
        config: &SettlementScheduleConfig,
        store: &dyn SettlementStore,
        engine: &SettlementEngine,
    ) {
        let period = config.interval.max(Duration::from_secs(1));

        if config.align_to_boundary {
            let now = Utc::now();
            let next_execution = Self::calculate_next_execution(now, period);
            let wait = next_execution.signed_duration_since(now);

            info!(
                "⏰ First settlement batch scheduled for: {} UTC",
                next_execution.format("%Y-%m-%d %H:%M:%S")
            );

            if let Ok(wait) = wait.to_std() {
                tokio::time::sleep(wait).await;
            }
        }

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            Self::run_batch(store, engine, Utc::now()).await;
        }
    }

    /// Settle every activity that is due at `now`, isolating failures per activity
    pub async fn run_batch(
        store: &dyn SettlementStore,
        engine: &SettlementEngine,
        now: DateTime<Utc>,
    ) -> BatchReport {
        info!("🔄 Starting settlement batch");

        let activities = match store.list_unsettled(now).await {
            Ok(activities) => activities,
            Err(e) => {
                error!("❌ Failed to list unsettled activities: {:?}", e);
                return BatchReport::default();
            }
        };

        let mut report = BatchReport {
            found: activities.len(),
            ..BatchReport::default()
        };

        if activities.is_empty() {
            info!("✓ No activities pending settlement");
            return report;
        }

        info!("📊 Found {} activities pending settlement", activities.len());

        for activity in &activities {
            match engine.settle(activity).await {
                Ok(settled) => {
                    debug!(
                        activity_id = %settled.activity_id,
                        branch = ?settled.outcome.branch,
                        "Activity settled in batch"
                    );
                    report.settled += 1;
                }
                Err(e) if e.is_not_claimable() => {
                    warn!("⏭️ Activity {} already claimed, skipping", activity.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("❌ Settlement of activity {} failed: {:?}", activity.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "✓ Settlement batch completed: {} found, {} settled, {} skipped, {} failed",
            report.found, report.settled, report.skipped, report.failed
        );

        report
    }

    /// Next multiple of `period` since the Unix epoch, strictly after `now`
    fn calculate_next_execution(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
        let period_secs = period.as_secs().max(1) as i64;
        let next = (now.timestamp().div_euclid(period_secs) + 1) * period_secs;

        Utc.timestamp_opt(next, 0).single().unwrap_or(now)
    }
}
