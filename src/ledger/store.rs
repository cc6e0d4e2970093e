use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;

/// Sink for the money movements produced by a settlement
#[async_trait]
pub trait LedgerSink: Send {
    async fn record_income(&mut self, income: &IncomeRecord) -> AppResult<()>;

    async fn record_forfeiture(&mut self, forfeiture: &ForfeitureRecord) -> AppResult<()>;
}

/// One atomic settlement scope over a single activity
///
/// INVARIANTS:
/// - Nothing written through the scope is visible until `commit` succeeds
/// - Dropping the scope without committing discards every write
/// - Rows read through the scope stay locked until commit or drop
#[async_trait]
pub trait SettlementScope: LedgerSink {
    /// Move the activity from Unsettled to InProgress; false if it was not unsettled
    async fn claim(&mut self, activity_id: Uuid) -> AppResult<bool>;

    async fn list_participations(&mut self, activity_id: Uuid) -> AppResult<Vec<Participation>>;

    async fn save_participations(&mut self, participations: &[Participation]) -> AppResult<()>;

    /// Commit point: InProgress → Settled
    async fn mark_settled(&mut self, activity_id: Uuid) -> AppResult<()>;

    async fn log_audit_event(
        &mut self,
        event_type: AuditEventType,
        activity_id: Uuid,
        details: serde_json::Value,
    ) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Activity lookup plus the entry point for settlement scopes
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Activities whose end time has passed and that are still unsettled
    async fn list_unsettled(&self, now: DateTime<Utc>) -> AppResult<Vec<Activity>>;

    async fn begin(&self) -> AppResult<Box<dyn SettlementScope>>;
}

/// Read-only attendance counts recorded by the check-in service
#[async_trait]
pub trait AttendanceLookup: Send + Sync {
    async fn count_check_ins(&self, activity_id: Uuid, user_id: Uuid) -> AppResult<u32>;
}
