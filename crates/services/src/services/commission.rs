//! Commission tier resolution and effective rate computation.

use db::models::{referral_member::ReferralMember, referral_setting::CommissionTier};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Tier matched for a revenue figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TierMatch {
    pub rate: f64,
    pub label: String,
    /// Lower bound of the following tier, if any
    pub next_tier_min: Option<i64>,
}

impl TierMatch {
    fn unmatched() -> Self {
        Self {
            rate: 0.0,
            label: String::new(),
            next_tier_min: None,
        }
    }
}

/// Find the tier whose `[min_revenue, max_revenue)` range holds `revenue`.
/// Revenue on a boundary belongs to the higher tier. No match yields a zero
/// rate.
pub fn resolve_tier(revenue: i64, tiers: &[CommissionTier]) -> TierMatch {
    let Some(tier) = tiers.iter().find(|t| t.contains(revenue)) else {
        return TierMatch::unmatched();
    };

    let next_tier_min = tiers
        .iter()
        .map(|t| t.min_revenue)
        .filter(|min| *min > tier.min_revenue)
        .min();

    TierMatch {
        rate: tier.rate,
        label: tier.label.clone(),
        next_tier_min,
    }
}

/// Custom rate replaces everything when enabled; otherwise the rank bonus is
/// added to the tier rate.
pub fn effective_rate(tier_rate: f64, member: &ReferralMember) -> f64 {
    match (member.custom_rate_enabled, member.custom_commission_rate) {
        (true, Some(custom)) => custom,
        _ => tier_rate + member.seeder_rank_bonus,
    }
}

/// Commission for `order_amount` at `rate_percent`, rounded to the nearest unit
pub fn commission_amount(order_amount: i64, rate_percent: f64) -> i64 {
    if order_amount <= 0 || rate_percent <= 0.0 {
        return 0;
    }
    (order_amount as f64 * rate_percent / 100.0).round() as i64
}

/// Tiers must start at zero, be sorted, contiguous and only the last one
/// may be unbounded.
pub fn validate_tiers(tiers: &[CommissionTier]) -> Result<(), String> {
    let Some(first) = tiers.first() else {
        return Err("at least one commission tier is required".to_string());
    };
    if first.min_revenue != 0 {
        return Err("the first tier must start at 0".to_string());
    }

    for (index, tier) in tiers.iter().enumerate() {
        if !(0.0..=100.0).contains(&tier.rate) {
            return Err(format!("tier '{}' rate {} outside 0-100", tier.label, tier.rate));
        }
        let is_last = index + 1 == tiers.len();
        match (tier.max_revenue, tiers.get(index + 1)) {
            (None, _) if !is_last => {
                return Err(format!("only the last tier may be unbounded ('{}')", tier.label));
            }
            (Some(max), _) if max <= tier.min_revenue => {
                return Err(format!("tier '{}' has an empty range", tier.label));
            }
            (Some(max), Some(next)) if next.min_revenue != max => {
                return Err(format!(
                    "tier '{}' ends at {} but '{}' starts at {}",
                    tier.label, max, next.label, next.min_revenue
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use db::models::referral_member::{CreateReferralMember, MemberStatus};

    use super::*;

    fn two_tiers() -> Vec<CommissionTier> {
        vec![
            CommissionTier::new(0, Some(10_000_000), 1.0, "Bac 1"),
            CommissionTier::new(10_000_000, None, 2.0, "Bac 2"),
        ]
    }

    fn member() -> ReferralMember {
        let data = CreateReferralMember {
            full_name: "Hoa".to_string(),
            email: "hoa@example.vn".to_string(),
            phone: None,
            referrer_code: None,
        };
        ReferralMember::new(&data, "HOA00001".to_string(), None, MemberStatus::Active, Utc::now())
    }

    #[test]
    fn test_boundary_revenue_belongs_to_upper_tier() {
        let tiers = two_tiers();

        let below = resolve_tier(9_999_999, &tiers);
        assert_eq!(below.rate, 1.0);
        assert_eq!(below.label, "Bac 1");
        assert_eq!(below.next_tier_min, Some(10_000_000));

        let boundary = resolve_tier(10_000_000, &tiers);
        assert_eq!(boundary.rate, 2.0);
        assert_eq!(boundary.next_tier_min, None);
    }

    #[test]
    fn test_unmatched_revenue_defaults_to_zero_rate() {
        let tiers = vec![CommissionTier::new(1_000, None, 2.0, "Bac 2")];
        assert_eq!(resolve_tier(500, &tiers).rate, 0.0);
        assert_eq!(resolve_tier(500, &[]).label, "");
    }

    #[test]
    fn test_rank_bonus_added_to_tier_rate() {
        let mut member = member();
        member.seeder_rank_bonus = 0.5;
        assert_eq!(effective_rate(2.0, &member), 2.5);
    }

    #[test]
    fn test_custom_rate_overrides_without_bonus() {
        let mut member = member();
        member.seeder_rank_bonus = 2.5;
        member.custom_rate_enabled = true;
        member.custom_commission_rate = Some(4.0);
        assert_eq!(effective_rate(1.0, &member), 4.0);

        // Enabled without a value falls back to the regular calculation
        member.custom_commission_rate = None;
        assert_eq!(effective_rate(1.0, &member), 3.5);
    }

    #[test]
    fn test_commission_rounds_to_nearest_unit() {
        assert_eq!(commission_amount(1_000_000, 1.0), 10_000);
        assert_eq!(commission_amount(12_345, 2.5), 309);
        assert_eq!(commission_amount(-5, 2.0), 0);
    }

    #[test]
    fn test_validate_tiers() {
        assert!(validate_tiers(&two_tiers()).is_ok());
        assert!(validate_tiers(&[]).is_err());

        let gap = vec![
            CommissionTier::new(0, Some(5), 1.0, "a"),
            CommissionTier::new(6, None, 2.0, "b"),
        ];
        assert!(validate_tiers(&gap).is_err());

        let open_middle = vec![
            CommissionTier::new(0, None, 1.0, "a"),
            CommissionTier::new(6, None, 2.0, "b"),
        ];
        assert!(validate_tiers(&open_middle).is_err());
    }
}
