//! Heuristics flagging referral orders that should not earn commission.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Facts about an order relevant to fraud screening
#[derive(Debug, Clone)]
pub struct FraudContext<'a> {
    pub referrer_email: &'a str,
    pub customer_email: &'a str,
    pub order_amount: i64,
    /// Referral events already recorded for this customer in the last 24 hours
    pub customer_orders_last_day: usize,
    pub max_orders_per_customer_per_day: u32,
    pub max_order_amount: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FraudAssessment {
    pub reasons: Vec<String>,
}

impl FraudAssessment {
    pub fn is_suspicious(&self) -> bool {
        !self.reasons.is_empty()
    }
}

pub fn assess(ctx: &FraudContext<'_>) -> FraudAssessment {
    let mut reasons = Vec::new();

    if ctx.referrer_email.trim().eq_ignore_ascii_case(ctx.customer_email.trim()) {
        reasons.push("self-referral: customer is the referrer".to_string());
    }

    if ctx.customer_orders_last_day >= ctx.max_orders_per_customer_per_day as usize {
        reasons.push(format!(
            "velocity: {} referred orders from this customer in 24h (limit {})",
            ctx.customer_orders_last_day, ctx.max_orders_per_customer_per_day
        ));
    }

    if let Some(max) = ctx.max_order_amount {
        if ctx.order_amount > max {
            reasons.push(format!(
                "amount: order of {} exceeds limit {}",
                ctx.order_amount, max
            ));
        }
    }

    FraudAssessment { reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> FraudContext<'a> {
        FraudContext {
            referrer_email: "mai@example.vn",
            customer_email: "khach@example.vn",
            order_amount: 500_000,
            customer_orders_last_day: 0,
            max_orders_per_customer_per_day: 5,
            max_order_amount: Some(10_000_000),
        }
    }

    #[test]
    fn test_clean_order_passes() {
        assert!(!assess(&ctx()).is_suspicious());
    }

    #[test]
    fn test_self_referral_ignores_case() {
        let ctx = FraudContext {
            customer_email: " MAI@example.vn",
            ..ctx()
        };
        let assessment = assess(&ctx);
        assert_eq!(assessment.reasons.len(), 1);
        assert!(assessment.reasons[0].starts_with("self-referral"));
    }

    #[test]
    fn test_velocity_and_amount_limits() {
        let ctx = FraudContext {
            customer_orders_last_day: 5,
            order_amount: 10_000_001,
            ..ctx()
        };
        assert_eq!(assess(&ctx).reasons.len(), 2);
    }

    #[test]
    fn test_amount_limit_can_be_disabled() {
        let ctx = FraudContext {
            order_amount: i64::MAX,
            max_order_amount: None,
            ..ctx()
        };
        assert!(!assess(&ctx).is_suspicious());
    }
}
