//! Pre-order cancellation refund policy.

use chrono::{DateTime, NaiveDate, Utc};
use db::models::preorder_setting::RefundTier;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundQuote {
    pub refund_amount: i64,
    pub refund_percent: f64,
    pub tier_label: String,
    pub days_before_harvest: i64,
}

/// Whole calendar days from `now` until the harvest date; negative once the
/// harvest date has passed.
pub fn days_before_harvest(harvest_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    (harvest_date - now.date_naive()).num_days()
}

/// Pick the most generous tier whose threshold the notice period satisfies.
/// Cancelling after every threshold has passed refunds nothing.
pub fn calculate_refund(
    deposit_amount: i64,
    harvest_date: NaiveDate,
    now: DateTime<Utc>,
    tiers: &[RefundTier],
) -> RefundQuote {
    let days = days_before_harvest(harvest_date, now);

    let tier = tiers
        .iter()
        .filter(|t| days >= t.min_days_before_harvest)
        .max_by_key(|t| t.min_days_before_harvest);

    let (refund_percent, tier_label) = match tier {
        Some(t) => (t.refund_percent, t.label.clone()),
        None => (0.0, "no refund".to_string()),
    };

    let refund_amount = (deposit_amount.max(0) as f64 * refund_percent / 100.0).round() as i64;

    RefundQuote {
        refund_amount: refund_amount.min(deposit_amount.max(0)),
        refund_percent,
        tier_label,
        days_before_harvest: days,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use db::models::preorder_setting::PreOrderSetting;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 21, 30, 0).unwrap()
    }

    fn quote(days_out: i64) -> RefundQuote {
        let harvest = now().date_naive() + Duration::days(days_out);
        calculate_refund(1_000_000, harvest, now(), &PreOrderSetting::default().refund_tiers)
    }

    #[test]
    fn test_ten_days_out_is_full_refund() {
        let q = quote(10);
        assert_eq!(q.refund_percent, 100.0);
        assert_eq!(q.refund_amount, 1_000_000);
        assert_eq!(q.days_before_harvest, 10);
    }

    #[test]
    fn test_five_days_out_is_half_refund() {
        let q = quote(5);
        assert_eq!(q.refund_percent, 50.0);
        assert_eq!(q.refund_amount, 500_000);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(quote(7).refund_percent, 100.0);
        assert_eq!(quote(6).refund_percent, 50.0);
        assert_eq!(quote(3).refund_percent, 50.0);
        assert_eq!(quote(2).refund_percent, 0.0);
    }

    #[test]
    fn test_tomorrow_and_past_harvest_refund_nothing() {
        assert_eq!(quote(1).refund_amount, 0);

        let past = quote(-4);
        assert_eq!(past.refund_amount, 0);
        assert_eq!(past.tier_label, "no refund");
        assert_eq!(past.days_before_harvest, -4);
    }

    #[test]
    fn test_days_count_calendar_days() {
        // Late evening still counts the whole next day as one day out
        let harvest = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(days_before_harvest(harvest, now()), 1);
    }
}
