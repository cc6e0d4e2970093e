use super::models::*;
use super::store::{AttendanceLookup, LedgerSink, SettlementScope, SettlementStore};
use crate::error::{AppError, AppResult, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const ACTIVITY_COLUMNS: &str = r#"
    id, name, begin_time, end_time, weekday_mask, window_start, window_end,
    deposit_amount::TEXT AS deposit_amount, status
"#;

const PARTICIPATION_COLUMNS: &str = r#"
    id, activity_id, user_id, staked_amount::TEXT AS staked_amount,
    joined_at, required_count, status
"#;

/// Ledger repository - source of truth for activities, participations and payouts
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}

#[async_trait]
impl SettlementStore for LedgerRepository {
    async fn list_unsettled(&self, now: DateTime<Utc>) -> AppResult<Vec<Activity>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM activities
            WHERE status = $1 AND end_time < $2
            ORDER BY end_time ASC
            "#,
            ACTIVITY_COLUMNS
        ))
        .bind(ActivityStatus::Unsettled)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Activity::from_row).collect()
    }

    async fn begin(&self) -> AppResult<Box<dyn SettlementScope>> {
        let tx = self.begin_tx().await?;
        Ok(Box::new(PgSettlementScope { tx }))
    }
}

#[async_trait]
impl AttendanceLookup for LedgerRepository {
    async fn count_check_ins(&self, activity_id: Uuid, user_id: Uuid) -> AppResult<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM check_ins WHERE activity_id = $1 AND user_id = $2",
        )
        .bind(activity_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }
}

/// Settlement scope backed by a single Postgres transaction
///
/// Rolled back by sqlx when dropped without `commit`.
pub struct PgSettlementScope {
    tx: Transaction<'static, Postgres>,
}

impl PgSettlementScope {
    async fn update_activity_status(
        &mut self,
        activity_id: Uuid,
        from: ActivityStatus,
        to: ActivityStatus,
    ) -> AppResult<u64> {
        from.transition_to(to)?;

        let result = sqlx::query(
            r#"
            UPDATE activities
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(activity_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LedgerSink for PgSettlementScope {
    async fn record_income(&mut self, income: &IncomeRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_incomes (user_id, activity_id, total_amount, bonus_amount, title, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(income.user_id)
        .bind(income.activity_id)
        .bind(to_big_decimal(income.total_amount)?)
        .bind(to_big_decimal(income.bonus_amount)?)
        .bind(&income.title)
        .bind(&income.message)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn record_forfeiture(&mut self, forfeiture: &ForfeitureRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_forfeitures (user_id, activity_id, amount, title, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(forfeiture.user_id)
        .bind(forfeiture.activity_id)
        .bind(to_big_decimal(forfeiture.amount)?)
        .bind(&forfeiture.title)
        .bind(&forfeiture.message)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SettlementScope for PgSettlementScope {
    async fn claim(&mut self, activity_id: Uuid) -> AppResult<bool> {
        // The UPDATE takes the row lock; a concurrent pass blocks here and then sees 0 rows
        let claimed = self
            .update_activity_status(activity_id, ActivityStatus::Unsettled, ActivityStatus::InProgress)
            .await?;

        Ok(claimed == 1)
    }

    async fn list_participations(&mut self, activity_id: Uuid) -> AppResult<Vec<Participation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM participations
            WHERE activity_id = $1
            ORDER BY joined_at ASC, id ASC
            FOR UPDATE
            "#,
            PARTICIPATION_COLUMNS
        ))
        .bind(activity_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(Participation::from_row).collect()
    }

    async fn save_participations(&mut self, participations: &[Participation]) -> AppResult<()> {
        for participation in participations {
            sqlx::query(
                r#"
                UPDATE participations
                SET status = $2, required_count = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(participation.id)
            .bind(participation.status)
            .bind(participation.required_count.map(|c| c.min(i32::MAX as u32) as i32))
            .execute(&mut *self.tx)
            .await?;
        }

        debug!("Saved {} participations", participations.len());
        Ok(())
    }

    async fn mark_settled(&mut self, activity_id: Uuid) -> AppResult<()> {
        let updated = self
            .update_activity_status(activity_id, ActivityStatus::InProgress, ActivityStatus::Settled)
            .await?;

        if updated == 0 {
            return Err(SettlementError::InvalidTransition {
                entity: "activity",
                from: "unknown".to_string(),
                to: ActivityStatus::Settled.to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn log_audit_event(
        &mut self,
        event_type: AuditEventType,
        activity_id: Uuid,
        details: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (event_type, entity_id, details)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event_type)
        .bind(activity_id)
        .bind(details)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn to_big_decimal(amount: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&amount.to_string())
        .map_err(|e| AppError::InvalidInput(format!("Invalid amount {}: {:?}", amount, e)))
}
