//! Delay and shortage compensation rules.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use db::models::{
    auto_compensation::{CompensationTrigger, CompensationValue},
    preorder_setting::CompensationRule,
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::codes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CompensationQuote {
    pub value: CompensationValue,
    /// Money credited, or the voucher's face value
    pub amount: i64,
    pub voucher_code: Option<String>,
    pub voucher_expires_at: Option<DateTime<Utc>>,
}

impl CompensationQuote {
    pub fn is_voucher(&self) -> bool {
        matches!(self.value, CompensationValue::Voucher { .. })
    }
}

/// First rule in table order for `trigger` whose threshold `magnitude` reaches
pub fn match_rule(
    trigger: CompensationTrigger,
    magnitude: f64,
    rules: &[CompensationRule],
) -> Option<&CompensationRule> {
    rules
        .iter()
        .find(|r| r.trigger == trigger && magnitude >= r.min_magnitude)
}

/// Price a matched rule against the order value
pub fn apply(
    rule: &CompensationRule,
    order_value: i64,
    now: DateTime<Utc>,
    voucher_valid_days: i64,
) -> CompensationQuote {
    let percent_of = |percent: f64| (order_value.max(0) as f64 * percent / 100.0).round() as i64;

    match &rule.value {
        CompensationValue::Fixed { amount } => CompensationQuote {
            value: rule.value.clone(),
            amount: (*amount).max(0),
            voucher_code: None,
            voucher_expires_at: None,
        },
        CompensationValue::Percent { percent } => CompensationQuote {
            value: rule.value.clone(),
            amount: percent_of(*percent),
            voucher_code: None,
            voucher_expires_at: None,
        },
        CompensationValue::Voucher { percent } => CompensationQuote {
            value: rule.value.clone(),
            amount: percent_of(*percent),
            voucher_code: Some(codes::voucher_code()),
            voucher_expires_at: TimeDelta::try_days(voucher_valid_days)
                .and_then(|validity| now.checked_add_signed(validity)),
        },
    }
}

/// Days the harvest slipped past the original date; never negative
pub fn delay_days(original: NaiveDate, rescheduled: NaiveDate) -> i64 {
    (rescheduled - original).num_days().max(0)
}

/// Percent of the expected quantity that will not be delivered
pub fn shortage_percent(expected: i64, actual: i64) -> f64 {
    if expected <= 0 || actual >= expected {
        return 0.0;
    }
    (expected - actual.max(0)) as f64 * 100.0 / expected as f64
}
