use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult, SettlementError};

// ========== SCHEDULE ==========

/// Set of weekdays on which a check-in is required.
///
/// Stored as a 7-bit mask: bit 0 = Monday ... bit 6 = Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    const ALL_BITS: u8 = 0b0111_1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from a stored mask, dropping bits that map to no weekday
    pub fn from_mask(mask: i16) -> Self {
        Self((mask as u8) & Self::ALL_BITS)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn with(mut self, day: Weekday) -> Self {
        self.insert(day);
        self
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), WeekdaySet::with)
    }
}

/// Daily check-in window in the schedule's local time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// A window that closes at or before it opens cannot be satisfied
    pub fn is_consistent(&self) -> bool {
        self.end > self.start
    }

    /// Combine the two nullable columns; a half-specified window is treated as absent
    pub fn from_columns(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(Self::new(start, end)),
            _ => None,
        }
    }
}

// ========== STATUS ENUMS ==========

/// Activity settlement status
///
/// Valid transitions:
/// - Unsettled → InProgress (claimed by a settlement pass)
/// - InProgress → Settled (commit point)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "activity_status", rename_all = "snake_case")]
pub enum ActivityStatus {
    Unsettled,
    InProgress,
    Settled,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Unsettled => "unsettled",
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Settled => "settled",
        }
    }

    pub fn transition_to(self, to: ActivityStatus) -> AppResult<ActivityStatus> {
        match (self, to) {
            (ActivityStatus::Unsettled, ActivityStatus::InProgress)
            | (ActivityStatus::InProgress, ActivityStatus::Settled) => Ok(to),
            _ => Err(SettlementError::InvalidTransition {
                entity: "activity",
                from: self.to_string(),
                to: to.to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Participation outcome status
///
/// Starts Succeeded at join time (or Pending before the stake clears) and can only
/// move downwards. Failed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "participation_status", rename_all = "snake_case")]
pub enum ParticipationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Pending => "pending",
            ParticipationStatus::Succeeded => "succeeded",
            ParticipationStatus::Failed => "failed",
        }
    }

    pub fn transition_to(self, to: ParticipationStatus) -> AppResult<ParticipationStatus> {
        let allowed = match self {
            ParticipationStatus::Pending => true,
            ParticipationStatus::Succeeded => to != ParticipationStatus::Pending,
            ParticipationStatus::Failed => false,
        };

        if !allowed {
            return Err(SettlementError::InvalidTransition {
                entity: "participation",
                from: self.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        Ok(to)
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit event types written next to settlement records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "audit_event_type", rename_all = "snake_case")]
pub enum AuditEventType {
    ActivitySettled,
}

// ========== ENTITIES ==========

/// Activity entity - a commitment challenge with a schedule and a stake pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub name: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub weekdays: WeekdaySet,
    pub daily_window: Option<DailyWindow>,

    /// Per-unit stake, used as the normalizing divisor for bonus units
    #[serde(with = "rust_decimal::serde::float")]
    pub deposit_amount: Decimal,
    pub status: ActivityStatus,
}

impl Activity {
    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        let deposit_str: String = row.try_get("deposit_amount")?;
        let weekday_mask: i16 = row.try_get("weekday_mask")?;

        Ok(Activity {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            begin_time: row.try_get("begin_time")?,
            end_time: row.try_get("end_time")?,
            weekdays: WeekdaySet::from_mask(weekday_mask),
            daily_window: DailyWindow::from_columns(
                row.try_get("window_start")?,
                row.try_get("window_end")?,
            ),
            deposit_amount: parse_amount(&deposit_str, "deposit_amount")?,
            status: row.try_get("status")?,
        })
    }
}

/// One participant's stake and outcome within an activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participation {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub staked_amount: Decimal,
    pub joined_at: DateTime<Utc>,
    pub required_count: Option<u32>,
    pub status: ParticipationStatus,
}

impl Participation {
    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        let staked_str: String = row.try_get("staked_amount")?;
        let required_count: Option<i32> = row.try_get("required_count")?;

        Ok(Participation {
            id: row.try_get("id")?,
            activity_id: row.try_get("activity_id")?,
            user_id: row.try_get("user_id")?,
            staked_amount: parse_amount(&staked_str, "staked_amount")?,
            joined_at: row.try_get("joined_at")?,
            required_count: required_count.map(|c| c.max(0) as u32),
            status: row.try_get("status")?,
        })
    }

    pub fn is_failed(&self) -> bool {
        self.status == ParticipationStatus::Failed
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ParticipationStatus::Succeeded
    }
}

// ========== LEDGER RECORDS ==========

/// Income credited to a participant who completed an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeRecord {
    pub user_id: Uuid,
    pub activity_id: Uuid,

    /// Principal plus bonus
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub bonus_amount: Decimal,
    pub title: String,
    pub message: String,
}

/// Stake forfeited by a participant who failed an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForfeitureRecord {
    pub user_id: Uuid,
    pub activity_id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub title: String,
    pub message: String,
}

fn parse_amount(raw: &str, column: &str) -> AppResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|_| AppError::InvalidInput(format!("Invalid {} format: {}", column, raw)))
}
