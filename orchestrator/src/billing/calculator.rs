//! Billing calculator: pure functions, no I/O.
//!
//! All currency arithmetic runs on `BigDecimal`; results are rounded
//! half-up to two decimal places at the very end. The invoicing subsystem
//! consumes these numbers, it never recomputes them.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{Months, NaiveDate};

use crate::database::Plan;
use crate::errors::ValidationError;
use crate::state::BillingCycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChangeKind {
    Upgrade,
    Downgrade,
}

/// Signed adjustment for a mid-cycle plan change.
///
/// The day-count basis is whole days in the current cycle. On the cycle
/// boundaries (`days_used == 0` or `days_remaining == 0`) the full price
/// difference is charged/credited instead of a fractional amount, which
/// avoids near-zero and near-full double charging around renewal.
///
/// A negative result is a downgrade credit, capped at one full month of the
/// old plan. Positive slivers below `minimum_charge` are raised to it so no
/// zero-value invoice lines are emitted.
pub fn prorated_plan_change_amount(
    old_monthly: &BigDecimal,
    new_monthly: &BigDecimal,
    period_start: NaiveDate,
    next_billing_date: NaiveDate,
    change_date: NaiveDate,
    minimum_charge: &BigDecimal,
) -> Result<BigDecimal, ValidationError> {
    let total_days = (next_billing_date - period_start).num_days();
    if total_days <= 0 {
        return Err(ValidationError::InvalidValue {
            field: "next_billing_date".to_string(),
            reason: "billing period must span at least one day".to_string(),
        });
    }
    if change_date < period_start || change_date > next_billing_date {
        return Err(ValidationError::InvalidValue {
            field: "change_date".to_string(),
            reason: "change date must fall within the current billing period".to_string(),
        });
    }

    let days_used = (change_date - period_start).num_days();
    let days_remaining = (next_billing_date - change_date).num_days();

    let mut amount = if days_used == 0 || days_remaining == 0 {
        new_monthly - old_monthly
    } else {
        let total = BigDecimal::from(total_days);
        let old_daily = old_monthly / &total;
        let new_daily = new_monthly / &total;
        (new_daily - old_daily) * BigDecimal::from(days_remaining)
    };

    let zero = BigDecimal::from(0);
    if amount < zero {
        // Downgrade credit, bounded to one month of the old plan
        let max_credit = -old_monthly;
        if amount < max_credit {
            amount = max_credit;
        }
    } else if amount > zero && amount < *minimum_charge {
        amount = minimum_charge.clone();
    }

    Ok(amount.with_scale_round(2, RoundingMode::HalfUp))
}

/// Advance a billing date by one cycle.
///
/// `Months` addition clamps to the end of the target month, so
/// Jan 31 + 1 month lands on Feb 28 (29 in leap years) and
/// Feb 29 + 12 months lands on Feb 28 of the non-leap year.
pub fn next_billing_date(from: NaiveDate, cycle: BillingCycle) -> NaiveDate {
    from.checked_add_months(Months::new(cycle.months()))
        .unwrap_or(from)
}

/// Validate a plan change request.
///
/// Downgrades are rejected unless explicitly allowed; an allowed mid-cycle
/// downgrade yields a credit from [`prorated_plan_change_amount`] rather
/// than being silently accepted at full price.
pub fn validate_plan_change(
    current: &Plan,
    target: &Plan,
    allow_downgrade: bool,
) -> Result<PlanChangeKind, ValidationError> {
    if current.id == target.id {
        return Err(ValidationError::InvalidPlanChange {
            reason: format!("subscription is already on plan '{}'", current.name),
        });
    }
    if !target.is_active {
        return Err(ValidationError::InvalidPlanChange {
            reason: format!("plan '{}' is no longer offered", target.name),
        });
    }
    if target.monthly_price < current.monthly_price {
        if !allow_downgrade {
            return Err(ValidationError::InvalidPlanChange {
                reason: format!(
                    "downgrade from '{}' to '{}' requires explicit approval",
                    current.name, target.name
                ),
            });
        }
        return Ok(PlanChangeKind::Downgrade);
    }
    Ok(PlanChangeKind::Upgrade)
}

/// Setup-fee refund on cancellation: full inside the grace period measured
/// from the start date, nothing after.
pub fn setup_fee_refund(
    setup_fee: &BigDecimal,
    start_date: NaiveDate,
    cancelled_on: NaiveDate,
    grace_days: i64,
) -> BigDecimal {
    let elapsed = (cancelled_on - start_date).num_days();
    if elapsed >= 0 && elapsed <= grace_days {
        setup_fee.with_scale_round(2, RoundingMode::HalfUp)
    } else {
        BigDecimal::from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn minimum() -> BigDecimal {
        dec("0.01")
    }

    #[test]
    fn test_mid_cycle_upgrade_is_fractional() {
        // 30-day cycle, change half way: 15 remaining days of a 1.00/day
        // price difference
        let amount = prorated_plan_change_amount(
            &dec("30.00"),
            &dec("60.00"),
            date("2025-01-01"),
            date("2025-01-31"),
            date("2025-01-16"),
            &minimum(),
        )
        .unwrap();
        assert_eq!(amount, dec("15.00"));
    }

    #[test]
    fn test_cycle_start_charges_full_difference() {
        let amount = prorated_plan_change_amount(
            &dec("10.00"),
            &dec("25.00"),
            date("2025-03-01"),
            date("2025-04-01"),
            date("2025-03-01"),
            &minimum(),
        )
        .unwrap();
        assert_eq!(amount, dec("15.00"));
    }

    #[test]
    fn test_cycle_end_charges_full_difference() {
        let amount = prorated_plan_change_amount(
            &dec("10.00"),
            &dec("25.00"),
            date("2025-03-01"),
            date("2025-04-01"),
            date("2025-04-01"),
            &minimum(),
        )
        .unwrap();
        assert_eq!(amount, dec("15.00"));
    }

    #[test]
    fn test_downgrade_yields_credit() {
        let amount = prorated_plan_change_amount(
            &dec("60.00"),
            &dec("30.00"),
            date("2025-01-01"),
            date("2025-01-31"),
            date("2025-01-16"),
            &minimum(),
        )
        .unwrap();
        assert_eq!(amount, dec("-15.00"));
    }

    #[test]
    fn test_downgrade_credit_capped_at_old_monthly_price() {
        // An absurd period length may compute a credit beyond one month of
        // the old plan; the cap bounds it.
        let amount = prorated_plan_change_amount(
            &dec("10.00"),
            &dec("0.00"),
            date("2025-01-01"),
            date("2025-12-31"),
            date("2025-01-02"),
            &minimum(),
        )
        .unwrap();
        assert!(amount >= dec("-10.00"));
        let amount = prorated_plan_change_amount(
            &dec("50.00"),
            &dec("1.00"),
            date("2025-01-01"),
            date("2025-01-31"),
            date("2025-01-02"),
            &minimum(),
        )
        .unwrap();
        assert!(amount.abs() <= dec("50.00"));
    }

    #[test]
    fn test_sliver_raised_to_minimum_charge() {
        // 0.10/month difference over 1 remaining day of 30 rounds below a
        // cent; the floor keeps the line chargeable
        let amount = prorated_plan_change_amount(
            &dec("10.00"),
            &dec("10.10"),
            date("2025-06-01"),
            date("2025-07-01"),
            date("2025-06-30"),
            &minimum(),
        )
        .unwrap();
        assert_eq!(amount, dec("0.01"));
    }

    #[test]
    fn test_result_rounded_half_up_to_cents() {
        // 31-day cycle, 1.00 difference: daily delta repeats, rounding must
        // settle on two decimals
        let amount = prorated_plan_change_amount(
            &dec("30.00"),
            &dec("31.00"),
            date("2025-01-01"),
            date("2025-02-01"),
            date("2025-01-12"),
            &minimum(),
        )
        .unwrap();
        // 1.00 / 31 * 20 = 0.64516... -> 0.65
        assert_eq!(amount, dec("0.65"));
    }

    #[test]
    fn test_change_date_outside_period_rejected() {
        let result = prorated_plan_change_amount(
            &dec("10.00"),
            &dec("20.00"),
            date("2025-01-01"),
            date("2025-02-01"),
            date("2025-02-02"),
            &minimum(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_next_billing_date_clamps_end_of_month() {
        assert_eq!(
            next_billing_date(date("2025-01-31"), BillingCycle::Monthly),
            date("2025-02-28")
        );
        assert_eq!(
            next_billing_date(date("2024-01-31"), BillingCycle::Monthly),
            date("2024-02-29")
        );
        assert_eq!(
            next_billing_date(date("2025-01-15"), BillingCycle::Quarterly),
            date("2025-04-15")
        );
    }

    #[test]
    fn test_next_billing_date_leap_day_annual() {
        assert_eq!(
            next_billing_date(date("2024-02-29"), BillingCycle::Annually),
            date("2025-02-28")
        );
    }

    #[test]
    fn test_setup_fee_refund_grace_period() {
        let fee = dec("25.00");
        assert_eq!(
            setup_fee_refund(&fee, date("2025-01-01"), date("2025-01-10"), 14),
            dec("25.00")
        );
        assert_eq!(
            setup_fee_refund(&fee, date("2025-01-01"), date("2025-01-15"), 14),
            dec("25.00")
        );
        assert_eq!(
            setup_fee_refund(&fee, date("2025-01-01"), date("2025-01-16"), 14),
            dec("0")
        );
        // Cancellation dated before the start yields nothing
        assert_eq!(
            setup_fee_refund(&fee, date("2025-01-10"), date("2025-01-01"), 14),
            dec("0")
        );
    }
}
