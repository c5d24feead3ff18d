use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::referral_member::SeederRank;
use crate::{
    entity::Entity,
    repository::{RepoResult, Repository},
};

/// Monthly revenue band `[min_revenue, max_revenue)` and its commission rate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct CommissionTier {
    pub min_revenue: i64,
    pub max_revenue: Option<i64>, // None = unbounded
    pub rate: f64,
    pub label: String,
}

impl CommissionTier {
    pub fn new(min_revenue: i64, max_revenue: Option<i64>, rate: f64, label: &str) -> Self {
        Self {
            min_revenue,
            max_revenue,
            rate,
            label: label.to_string(),
        }
    }

    pub fn contains(&self, revenue: i64) -> bool {
        revenue >= self.min_revenue && self.max_revenue.is_none_or(|max| revenue < max)
    }
}

/// What it takes to hold a rank, and what the rank grants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct RankRequirement {
    pub rank: SeederRank,
    pub f1_required: u32,
    /// Minimum rank some F1s must hold
    pub f1_rank_required: Option<SeederRank>,
    /// How many F1s must hold `f1_rank_required` or higher
    pub f1_rank_count_required: u32,
    pub bonus_percent: f64,
    pub grants_certificate: bool,
    pub grants_region_representative: bool,
}

/// Singleton referral program configuration
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferralSetting {
    pub id: Uuid,
    pub commission_tiers: Vec<CommissionTier>,
    pub seeder_rank_config: Vec<RankRequirement>,
    pub auto_approve_members: bool,
    pub min_payout_amount: i64,
    pub max_orders_per_customer_per_day: u32,
    pub max_order_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ReferralSetting {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Self::SINGLETON_ID,
            commission_tiers: vec![
                CommissionTier::new(0, Some(10_000_000), 1.0, "Bac 1"),
                CommissionTier::new(10_000_000, Some(50_000_000), 2.0, "Bac 2"),
                CommissionTier::new(50_000_000, None, 3.0, "Bac 3"),
            ],
            seeder_rank_config: vec![
                rank(SeederRank::NguoiGieoHat, 0, None, 0, 0.0, false, false),
                rank(SeederRank::HatGiongKhoe, 7, None, 0, 0.5, false, false),
                rank(SeederRank::MamXanh, 15, Some(SeederRank::HatGiongKhoe), 3, 1.0, false, false),
                rank(SeederRank::CayTruongThanh, 30, Some(SeederRank::MamXanh), 5, 1.5, false, true),
                rank(SeederRank::DanhHieu, 50, Some(SeederRank::CayTruongThanh), 3, 2.5, true, true),
            ],
            auto_approve_members: false,
            min_payout_amount: 200_000,
            max_orders_per_customer_per_day: 5,
            max_order_amount: Some(200_000_000),
            created_at: now,
            updated_at: now,
        }
    }
}

fn rank(
    rank: SeederRank,
    f1_required: u32,
    f1_rank_required: Option<SeederRank>,
    f1_rank_count_required: u32,
    bonus_percent: f64,
    grants_certificate: bool,
    grants_region_representative: bool,
) -> RankRequirement {
    RankRequirement {
        rank,
        f1_required,
        f1_rank_required,
        f1_rank_count_required,
        bonus_percent,
        grants_certificate,
        grants_region_representative,
    }
}

impl ReferralSetting {
    /// Fixed row id; record ids are unique across every collection
    pub const SINGLETON_ID: Uuid = Uuid::from_u128(0x5e77_1765_0000_4000_8000_0000_0000_0001);

    /// Stored settings, or defaults when none were saved yet
    pub async fn load(repo: &Repository<Self>) -> RepoResult<Self> {
        Ok(repo
            .find_by_id(Self::SINGLETON_ID)
            .await?
            .unwrap_or_default())
    }

    pub async fn store(repo: &Repository<Self>, mut setting: Self) -> RepoResult<Self> {
        setting.id = Self::SINGLETON_ID;
        match repo.find_by_id(Self::SINGLETON_ID).await? {
            Some(_) => repo.save(&setting).await,
            None => repo.create(setting).await,
        }
    }

    pub fn requirement_for(&self, rank: SeederRank) -> Option<&RankRequirement> {
        self.seeder_rank_config.iter().find(|r| r.rank == rank)
    }
}

impl Entity for ReferralSetting {
    const NAME: &'static str = "ReferralSetting";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.commission_tiers.is_empty() {
            return Err("at least one commission tier is required".to_string());
        }
        if self.min_payout_amount < 0 {
            return Err("min_payout_amount cannot be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_range_is_half_open() {
        let tier = CommissionTier::new(0, Some(10_000_000), 1.0, "Bac 1");
        assert!(tier.contains(0));
        assert!(tier.contains(9_999_999));
        assert!(!tier.contains(10_000_000));

        let open = CommissionTier::new(10_000_000, None, 2.0, "Bac 2");
        assert!(open.contains(10_000_000));
        assert!(open.contains(i64::MAX));
    }

    #[test]
    fn test_default_ladder_covers_every_rank() {
        let setting = ReferralSetting::default();
        for rank in SeederRank::LADDER {
            assert!(setting.requirement_for(rank).is_some(), "missing {rank}");
        }
    }
}
