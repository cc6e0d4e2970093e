// Settlement engine - settles one ended activity inside a single atomic scope
//
// Flow:
// 1. Claim the activity (Unsettled → InProgress) and lock its participations
// 2. Recompute each open participant's requirement and downgrade the ones short on attendance
// 3. Resolve the pool into one of three branches and the per-unit bonus rate
// 4. Write payouts/forfeitures, the audit entry, and flip the activity to Settled
// 5. Commit; any error before this point rolls everything back

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, SettlementError};
use crate::ledger::models::{Activity, AuditEventType, Participation, ParticipationStatus};
use crate::ledger::store::{AttendanceLookup, SettlementStore};
use crate::settlement::payout::{to_cents, PayoutApplier, PayoutSummary};
use crate::settlement::requirement::{required_check_ins, to_schedule_time};

/// Settlement configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Fraction of the forfeited pool retained by the platform (0.10 = 10%)
    pub platform_rate: Decimal,
    /// Offset of the schedule's local time from UTC
    pub schedule_offset: FixedOffset,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            platform_rate: dec!(0.10),
            schedule_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementBranch {
    /// Nobody completed (or the bonus divisor degenerated to zero): every stake is forfeited
    AllFailed,
    /// Nobody failed: every stake is refunded
    AllSucceeded,
    /// Forfeited stakes, minus the platform cut, are split across completed units
    Mixed,
}

/// Pool arithmetic for one settlement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub branch: SettlementBranch,
    pub total_pool: Decimal,
    pub forfeited_amount: Decimal,
    pub completed_amount: Decimal,
    pub total_required_units: u64,
    pub bonus_rate: Decimal,
    /// Mixed pool whose divisor came out as zero and was settled as AllFailed
    pub degenerate: bool,
}

/// Resolve the settlement branch and bonus rate from finalized statuses
pub fn resolve_outcome(
    activity: &Activity,
    participations: &[Participation],
    platform_rate: Decimal,
) -> SettlementOutcome {
    let total_pool: Decimal = participations.iter().map(|p| p.staked_amount).sum();
    let forfeited_amount: Decimal = participations
        .iter()
        .filter(|p| p.is_failed())
        .map(|p| p.staked_amount)
        .sum();
    let completed_amount = total_pool - forfeited_amount;
    let total_required_units: u64 = participations
        .iter()
        .filter(|p| p.is_succeeded())
        .map(|p| u64::from(p.required_count.unwrap_or(0)))
        .sum();

    let mut outcome = SettlementOutcome {
        branch: SettlementBranch::AllFailed,
        total_pool,
        forfeited_amount,
        completed_amount,
        total_required_units,
        bonus_rate: Decimal::ZERO,
        degenerate: false,
    };

    if completed_amount.is_zero() {
        return outcome;
    }

    if forfeited_amount.is_zero() {
        outcome.branch = SettlementBranch::AllSucceeded;
        return outcome;
    }

    let units = if activity.deposit_amount > Decimal::ZERO {
        (completed_amount / activity.deposit_amount).floor() * Decimal::from(total_required_units)
    } else {
        Decimal::ZERO
    };

    if units <= Decimal::ZERO {
        outcome.degenerate = true;
        return outcome;
    }

    outcome.branch = SettlementBranch::Mixed;
    outcome.bonus_rate = to_cents(forfeited_amount * (Decimal::ONE - platform_rate) / units);
    outcome
}

/// Result of a committed settlement
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub activity_id: Uuid,
    pub outcome: SettlementOutcome,
    /// Requirement over the whole activity window; audit only
    pub required_count_full: u32,
    pub succeeded: usize,
    pub failed: usize,
    pub payouts: PayoutSummary,
}

/// Settlement orchestrator
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    attendance: Arc<dyn AttendanceLookup>,
    applier: PayoutApplier,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        attendance: Arc<dyn AttendanceLookup>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            attendance,
            applier: PayoutApplier::new(),
            config,
        }
    }

    /// Requirement over the full activity window, ignoring the daily window
    pub fn required_count_full(&self, activity: &Activity) -> u32 {
        let offset = self.config.schedule_offset;
        required_check_ins(
            to_schedule_time(activity.begin_time, offset),
            to_schedule_time(activity.end_time, offset),
            activity.weekdays,
            None,
        )
    }

    /// Requirement for one participant over [max(join, begin), end]
    pub fn required_count_for(&self, activity: &Activity, participation: &Participation) -> u32 {
        let offset = self.config.schedule_offset;
        let effective_start = participation.joined_at.max(activity.begin_time);
        required_check_ins(
            to_schedule_time(effective_start, offset),
            to_schedule_time(activity.end_time, offset),
            activity.weekdays,
            activity.daily_window,
        )
    }

    /// Finalize one open participation against its attendance.
    ///
    /// Returns true when the participation was downgraded to Failed.
    pub fn evaluate(
        &self,
        activity: &Activity,
        participation: &mut Participation,
        attended: u32,
    ) -> AppResult<bool> {
        let required = self.required_count_for(activity, participation);
        let target = if attended < required {
            ParticipationStatus::Failed
        } else {
            ParticipationStatus::Succeeded
        };

        participation.status = participation.status.transition_to(target)?;
        participation.required_count = Some(required);

        Ok(target == ParticipationStatus::Failed)
    }

    /// Settle one activity atomically
    #[instrument(skip(self, activity), fields(activity_id = %activity.id))]
    pub async fn settle(&self, activity: &Activity) -> AppResult<SettlementReport> {
        let mut scope = self.store.begin().await?;

        if !scope.claim(activity.id).await? {
            return Err(SettlementError::NotClaimable(activity.id).into());
        }

        let mut participations = scope.list_participations(activity.id).await?;
        validate_stakes(&participations)?;

        let required_count_full = self.required_count_full(activity);
        let total_pool: Decimal = participations.iter().map(|p| p.staked_amount).sum();
        info!(
            "📊 Activity '{}': {} participants, pool {}, full-window requirement {}",
            activity.name,
            participations.len(),
            total_pool,
            required_count_full
        );

        // Participants that failed before this pass were charged at that time
        let mut failed_this_pass = HashSet::new();
        for participation in participations.iter_mut().filter(|p| !p.is_failed()) {
            let attended = self
                .attendance
                .count_check_ins(activity.id, participation.user_id)
                .await?;

            if self.evaluate(activity, participation, attended)? {
                debug!(
                    user_id = %participation.user_id,
                    attended,
                    required = participation.required_count.unwrap_or(0),
                    "Participant failed"
                );
                failed_this_pass.insert(participation.id);
            }
        }

        scope.save_participations(&participations).await?;

        let outcome = resolve_outcome(activity, &participations, self.config.platform_rate);
        if outcome.degenerate {
            warn!(
                "⚠️ Activity '{}' has zero bonus units (completed {}, deposit {}); settling as all-failed",
                activity.name, outcome.completed_amount, activity.deposit_amount
            );
        }

        let payable: Vec<&Participation> = match outcome.branch {
            SettlementBranch::AllFailed => Vec::new(),
            SettlementBranch::AllSucceeded | SettlementBranch::Mixed => {
                participations.iter().filter(|p| p.is_succeeded()).collect()
            }
        };
        // Degenerate pool: succeeded stakes are forfeited as well
        let forfeiting: Vec<&Participation> = participations
            .iter()
            .filter(|p| {
                failed_this_pass.contains(&p.id) || (outcome.degenerate && p.is_succeeded())
            })
            .collect();

        let payouts = self
            .applier
            .apply(scope.as_mut(), activity, &payable, &forfeiting, outcome.bonus_rate)
            .await?;

        let report = SettlementReport {
            activity_id: activity.id,
            succeeded: participations.iter().filter(|p| p.is_succeeded()).count(),
            failed: participations.iter().filter(|p| p.is_failed()).count(),
            outcome,
            required_count_full,
            payouts,
        };

        scope
            .log_audit_event(AuditEventType::ActivitySettled, activity.id, audit_details(&report))
            .await?;
        scope.mark_settled(activity.id).await?;
        scope.commit().await?;

        info!(
            "✓ Activity '{}' settled ({:?}): {} succeeded, {} failed, bonus rate {}, paid {}, forfeited {}",
            activity.name,
            report.outcome.branch,
            report.succeeded,
            report.failed,
            report.outcome.bonus_rate,
            report.payouts.total_paid,
            report.payouts.total_forfeited
        );

        Ok(report)
    }
}

fn validate_stakes(participations: &[Participation]) -> AppResult<()> {
    if let Some(bad) = participations.iter().find(|p| p.staked_amount <= Decimal::ZERO) {
        return Err(AppError::InvalidInput(format!(
            "Participation {} has non-positive stake {}",
            bad.id, bad.staked_amount
        )));
    }
    Ok(())
}

fn audit_details(report: &SettlementReport) -> serde_json::Value {
    let outcome = &report.outcome;
    serde_json::json!({
        "branch": outcome.branch,
        "degenerate": outcome.degenerate,
        "total_pool": outcome.total_pool.to_string(),
        "forfeited_amount": outcome.forfeited_amount.to_string(),
        "completed_amount": outcome.completed_amount.to_string(),
        "total_required_units": outcome.total_required_units,
        "bonus_rate": outcome.bonus_rate.to_string(),
        "required_count_full": report.required_count_full,
        "succeeded": report.succeeded,
        "failed": report.failed,
        "incomes": report.payouts.incomes,
        "forfeitures": report.payouts.forfeitures,
        "total_paid": report.payouts.total_paid.to_string(),
        "total_bonus": report.payouts.total_bonus.to_string(),
        "total_forfeited": report.payouts.total_forfeited.to_string(),
    })
}
