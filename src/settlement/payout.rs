// Payout applier - turns finalized participation statuses into ledger records
//
// Never mutates participation status; only reports amounts.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::error::AppResult;
use crate::ledger::models::{Activity, ForfeitureRecord, IncomeRecord, Participation};
use crate::ledger::store::LedgerSink;

pub const INCOME_TITLE: &str = "Activity reward";
pub const FORFEITURE_TITLE: &str = "Activity forfeiture";

/// Round down to the currency's minimal unit (cents)
pub fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Totals of what one `apply` call wrote to the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutSummary {
    pub incomes: usize,
    pub forfeitures: usize,
    pub total_paid: Decimal,
    pub total_bonus: Decimal,
    pub total_forfeited: Decimal,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayoutApplier;

impl PayoutApplier {
    pub fn new() -> Self {
        Self
    }

    /// Bonus earned by a succeeded participant at the given rate.
    ///
    /// bonus = floor(stake / deposit) * bonus_rate * required_count
    pub fn bonus_for(activity: &Activity, participation: &Participation, bonus_rate: Decimal) -> Decimal {
        if bonus_rate <= Decimal::ZERO || activity.deposit_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let units_held = (participation.staked_amount / activity.deposit_amount).floor();
        let required = Decimal::from(participation.required_count.unwrap_or(0));

        to_cents(units_held * bonus_rate * required)
    }

    pub fn income_for(activity: &Activity, participation: &Participation, bonus_rate: Decimal) -> IncomeRecord {
        let bonus = Self::bonus_for(activity, participation, bonus_rate);
        let total = to_cents(participation.staked_amount + bonus).max(Decimal::ZERO);

        IncomeRecord {
            user_id: participation.user_id,
            activity_id: activity.id,
            total_amount: total,
            bonus_amount: bonus,
            title: INCOME_TITLE.to_string(),
            message: format!(
                "Activity \"{}\" has been settled, you received {:.2}",
                activity.name, total
            ),
        }
    }

    pub fn forfeiture_for(activity: &Activity, participation: &Participation) -> ForfeitureRecord {
        // A succeeded stake is only forfeited when the pool had no bonus units to pay out
        let message = if participation.is_succeeded() {
            format!(
                "Activity \"{}\" had no complete deposit unit to settle, your stake of {:.2} has been forfeited",
                activity.name, participation.staked_amount
            )
        } else {
            format!(
                "You did not complete activity \"{}\", your stake of {:.2} has been forfeited",
                activity.name, participation.staked_amount
            )
        };

        ForfeitureRecord {
            user_id: participation.user_id,
            activity_id: activity.id,
            amount: participation.staked_amount,
            title: FORFEITURE_TITLE.to_string(),
            message,
        }
    }

    /// Record a forfeiture for every entry of `forfeiting` and an income for every
    /// succeeded entry of `payable`.
    pub async fn apply<S>(
        &self,
        sink: &mut S,
        activity: &Activity,
        payable: &[&Participation],
        forfeiting: &[&Participation],
        bonus_rate: Decimal,
    ) -> AppResult<PayoutSummary>
    where
        S: LedgerSink + ?Sized,
    {
        let mut summary = PayoutSummary::default();

        for participation in forfeiting {
            let forfeiture = Self::forfeiture_for(activity, participation);
            sink.record_forfeiture(&forfeiture).await?;

            debug!(
                activity_id = %activity.id,
                user_id = %participation.user_id,
                amount = %forfeiture.amount,
                "Stake forfeited"
            );
            summary.forfeitures += 1;
            summary.total_forfeited += forfeiture.amount;
        }

        for participation in payable.iter().filter(|p| p.is_succeeded()) {
            let income = Self::income_for(activity, participation, bonus_rate);
            sink.record_income(&income).await?;

            debug!(
                activity_id = %activity.id,
                user_id = %participation.user_id,
                total = %income.total_amount,
                bonus = %income.bonus_amount,
                "Payout recorded"
            );
            summary.incomes += 1;
            summary.total_paid += income.total_amount;
            summary.total_bonus += income.bonus_amount;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{ActivityStatus, ParticipationStatus, WeekdaySet};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        incomes: Vec<IncomeRecord>,
        forfeitures: Vec<ForfeitureRecord>,
    }

    #[async_trait]
    impl LedgerSink for RecordingSink {
        async fn record_income(&mut self, income: &IncomeRecord) -> AppResult<()> {
            self.incomes.push(income.clone());
            Ok(())
        }

        async fn record_forfeiture(&mut self, forfeiture: &ForfeitureRecord) -> AppResult<()> {
            self.forfeitures.push(forfeiture.clone());
            Ok(())
        }
    }

    fn activity(deposit: Decimal) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            name: "Morning run".to_string(),
            begin_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 1, 5, 23, 0, 0).unwrap(),
            weekdays: WeekdaySet::empty(),
            daily_window: None,
            deposit_amount: deposit,
            status: ActivityStatus::InProgress,
        }
    }

    fn participation(stake: Decimal, required: u32, status: ParticipationStatus) -> Participation {
        Participation {
            id: Uuid::new_v4(),
            activity_id: Uuid::nil(),
            user_id: Uuid::new_v4(),
            staked_amount: stake,
            joined_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            required_count: Some(required),
            status,
        }
    }

    #[test]
    fn test_zero_rate_is_pure_refund() {
        let activity = activity(dec!(100));
        let p = participation(dec!(100), 5, ParticipationStatus::Succeeded);

        let income = PayoutApplier::income_for(&activity, &p, Decimal::ZERO);
        assert_eq!(income.total_amount, dec!(100));
        assert_eq!(income.bonus_amount, Decimal::ZERO);
        assert_eq!(income.total_amount - income.bonus_amount, dec!(100));
    }

    #[test]
    fn test_bonus_formula() {
        let activity = activity(dec!(100));
        let p = participation(dec!(100), 5, ParticipationStatus::Succeeded);

        let income = PayoutApplier::income_for(&activity, &p, dec!(18.00));
        assert_eq!(income.bonus_amount, dec!(90.00));
        assert_eq!(income.total_amount, dec!(190.00));
        assert_eq!(income.message, "Activity \"Morning run\" has been settled, you received 190.00");
    }

    #[test]
    fn test_bonus_uses_whole_deposit_units_only() {
        let activity = activity(dec!(100));
        // 250 / 100 floors to 2 units
        let p = participation(dec!(250), 3, ParticipationStatus::Succeeded);

        assert_eq!(PayoutApplier::bonus_for(&activity, &p, dec!(1.50)), dec!(9.00));
        assert_eq!(PayoutApplier::income_for(&activity, &p, dec!(1.50)).total_amount, dec!(259.00));
    }

    #[test]
    fn test_bonus_monotonic_in_required_count() {
        let activity = activity(dec!(50));
        let rate = dec!(0.37);
        let mut previous = Decimal::ZERO;

        for required in 0..30 {
            let p = participation(dec!(150), required, ParticipationStatus::Succeeded);
            let bonus = PayoutApplier::bonus_for(&activity, &p, rate);
            assert!(bonus >= previous);
            previous = bonus;
        }
    }

    #[tokio::test]
    async fn test_apply_writes_forfeitures_and_incomes() {
        let activity = activity(dec!(100));
        let winner = participation(dec!(100), 5, ParticipationStatus::Succeeded);
        let loser = participation(dec!(100), 5, ParticipationStatus::Failed);
        let mut sink = RecordingSink::default();

        let summary = PayoutApplier::new()
            .apply(&mut sink, &activity, &[&winner], &[&loser], dec!(18.00))
            .await
            .unwrap();

        assert_eq!(summary.incomes, 1);
        assert_eq!(summary.forfeitures, 1);
        assert_eq!(summary.total_paid, dec!(190.00));
        assert_eq!(summary.total_bonus, dec!(90.00));
        assert_eq!(summary.total_forfeited, dec!(100));

        assert_eq!(sink.forfeitures[0].user_id, loser.user_id);
        assert_eq!(sink.forfeitures[0].amount, dec!(100));
        assert_eq!(sink.forfeitures[0].title, FORFEITURE_TITLE);
        assert!(sink.forfeitures[0].message.contains("Morning run"));
        assert_eq!(sink.incomes[0].user_id, winner.user_id);
        assert_eq!(sink.incomes[0].activity_id, activity.id);
    }

    #[tokio::test]
    async fn test_apply_pays_only_succeeded_entries() {
        let activity = activity(dec!(100));
        let failed = participation(dec!(100), 5, ParticipationStatus::Failed);
        let mut sink = RecordingSink::default();

        let summary = PayoutApplier::new()
            .apply(&mut sink, &activity, &[&failed], &[], dec!(1))
            .await
            .unwrap();

        assert_eq!(summary, PayoutSummary::default());
        assert!(sink.incomes.is_empty());
        assert!(sink.forfeitures.is_empty());
    }

    #[tokio::test]
    async fn test_succeeded_stake_forfeited_when_pool_has_no_units() {
        let activity = activity(dec!(100));
        let succeeded = participation(dec!(50), 0, ParticipationStatus::Succeeded);
        let mut sink = RecordingSink::default();

        let summary = PayoutApplier::new()
            .apply(&mut sink, &activity, &[], &[&succeeded], Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(summary.forfeitures, 1);
        assert_eq!(summary.total_forfeited, dec!(50));
        assert!(sink.incomes.is_empty());
        assert!(sink.forfeitures[0].message.contains("no complete deposit unit"));
    }

    #[test]
    fn test_to_cents_rounds_down() {
        assert_eq!(to_cents(dec!(3.339)), dec!(3.33));
        assert_eq!(to_cents(dec!(3.3)), dec!(3.30));
    }
}
