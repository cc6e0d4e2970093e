// In-memory ledger used by the settlement tests.
// Writes are staged per scope and only applied on commit, mirroring the Postgres
// transaction semantics of LedgerRepository.

use super::models::*;
use super::store::{AttendanceLookup, LedgerSink, SettlementScope, SettlementStore};
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    activities: HashMap<Uuid, Activity>,
    participations: Vec<Participation>,
    check_ins: HashMap<(Uuid, Uuid), u32>,
    incomes: Vec<IncomeRecord>,
    forfeitures: Vec<ForfeitureRecord>,
    audit_log: Vec<(AuditEventType, Uuid, serde_json::Value)>,
    failing_commit_points: HashSet<Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_activity(&self, activity: Activity) {
        self.state.lock().activities.insert(activity.id, activity);
    }

    pub fn insert_participation(&self, participation: Participation) {
        self.state.lock().participations.push(participation);
    }

    pub fn set_check_ins(&self, activity_id: Uuid, user_id: Uuid, count: u32) {
        self.state.lock().check_ins.insert((activity_id, user_id), count);
    }

    /// Make `mark_settled` fail for this activity, as a lost connection would
    pub fn fail_commit_point(&self, activity_id: Uuid) {
        self.state.lock().failing_commit_points.insert(activity_id);
    }

    pub fn activity(&self, activity_id: Uuid) -> Option<Activity> {
        self.state.lock().activities.get(&activity_id).cloned()
    }

    pub fn participation_of(&self, activity_id: Uuid, user_id: Uuid) -> Option<Participation> {
        self.state
            .lock()
            .participations
            .iter()
            .find(|p| p.activity_id == activity_id && p.user_id == user_id)
            .cloned()
    }

    pub fn incomes(&self) -> Vec<IncomeRecord> {
        self.state.lock().incomes.clone()
    }

    pub fn forfeitures(&self) -> Vec<ForfeitureRecord> {
        self.state.lock().forfeitures.clone()
    }

    pub fn audit_events(&self) -> Vec<(AuditEventType, Uuid, serde_json::Value)> {
        self.state.lock().audit_log.clone()
    }
}

#[async_trait]
impl SettlementStore for InMemoryLedger {
    async fn list_unsettled(&self, now: DateTime<Utc>) -> AppResult<Vec<Activity>> {
        let state = self.state.lock();
        let mut due: Vec<Activity> = state
            .activities
            .values()
            .filter(|a| a.status == ActivityStatus::Unsettled && a.end_time < now)
            .cloned()
            .collect();
        due.sort_by_key(|a| a.end_time);
        Ok(due)
    }

    async fn begin(&self) -> AppResult<Box<dyn SettlementScope>> {
        Ok(Box::new(InMemoryScope {
            state: self.state.clone(),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl AttendanceLookup for InMemoryLedger {
    async fn count_check_ins(&self, activity_id: Uuid, user_id: Uuid) -> AppResult<u32> {
        Ok(self
            .state
            .lock()
            .check_ins
            .get(&(activity_id, user_id))
            .copied()
            .unwrap_or(0))
    }
}

enum StagedWrite {
    ActivityStatus(Uuid, ActivityStatus),
    Participation(Participation),
    Income(IncomeRecord),
    Forfeiture(ForfeitureRecord),
    Audit(AuditEventType, Uuid, serde_json::Value),
}

struct InMemoryScope {
    state: Arc<Mutex<LedgerState>>,
    staged: Vec<StagedWrite>,
}

impl InMemoryScope {
    /// Status as seen from inside this scope (committed state plus staged changes)
    fn visible_status(&self, activity_id: Uuid) -> Option<ActivityStatus> {
        let staged = self.staged.iter().rev().find_map(|w| match w {
            StagedWrite::ActivityStatus(id, status) if *id == activity_id => Some(*status),
            _ => None,
        });
        staged.or_else(|| self.state.lock().activities.get(&activity_id).map(|a| a.status))
    }
}

#[async_trait]
impl LedgerSink for InMemoryScope {
    async fn record_income(&mut self, income: &IncomeRecord) -> AppResult<()> {
        self.staged.push(StagedWrite::Income(income.clone()));
        Ok(())
    }

    async fn record_forfeiture(&mut self, forfeiture: &ForfeitureRecord) -> AppResult<()> {
        self.staged.push(StagedWrite::Forfeiture(forfeiture.clone()));
        Ok(())
    }
}

#[async_trait]
impl SettlementScope for InMemoryScope {
    async fn claim(&mut self, activity_id: Uuid) -> AppResult<bool> {
        if self.visible_status(activity_id) != Some(ActivityStatus::Unsettled) {
            return Ok(false);
        }
        let next = ActivityStatus::Unsettled.transition_to(ActivityStatus::InProgress)?;
        self.staged.push(StagedWrite::ActivityStatus(activity_id, next));
        Ok(true)
    }

    async fn list_participations(&mut self, activity_id: Uuid) -> AppResult<Vec<Participation>> {
        Ok(self
            .state
            .lock()
            .participations
            .iter()
            .filter(|p| p.activity_id == activity_id)
            .cloned()
            .collect())
    }

    async fn save_participations(&mut self, participations: &[Participation]) -> AppResult<()> {
        self.staged
            .extend(participations.iter().cloned().map(StagedWrite::Participation));
        Ok(())
    }

    async fn mark_settled(&mut self, activity_id: Uuid) -> AppResult<()> {
        if self.state.lock().failing_commit_points.contains(&activity_id) {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        let current = self
            .visible_status(activity_id)
            .unwrap_or(ActivityStatus::Unsettled);
        let next = current.transition_to(ActivityStatus::Settled)?;
        self.staged.push(StagedWrite::ActivityStatus(activity_id, next));
        Ok(())
    }

    async fn log_audit_event(
        &mut self,
        event_type: AuditEventType,
        activity_id: Uuid,
        details: serde_json::Value,
    ) -> AppResult<()> {
        self.staged
            .push(StagedWrite::Audit(event_type, activity_id, details));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let InMemoryScope { state, staged } = *self;
        let mut state = state.lock();
        for write in staged {
            match write {
                StagedWrite::ActivityStatus(id, status) => {
                    if let Some(activity) = state.activities.get_mut(&id) {
                        activity.status = status;
                    }
                }
                StagedWrite::Participation(updated) => {
                    if let Some(existing) =
                        state.participations.iter_mut().find(|p| p.id == updated.id)
                    {
                        *existing = updated;
                    }
                }
                StagedWrite::Income(income) => state.incomes.push(income),
                StagedWrite::Forfeiture(forfeiture) => state.forfeitures.push(forfeiture),
                StagedWrite::Audit(event_type, id, details) => {
                    state.audit_log.push((event_type, id, details))
                }
            }
        }
        Ok(())
    }
}
