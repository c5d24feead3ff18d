use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::auto_compensation::{CompensationTrigger, CompensationValue};
use crate::{
    entity::Entity,
    repository::{RepoResult, Repository},
};

/// Longest voucher lifetime an admin may configure
pub const MAX_VOUCHER_VALID_DAYS: i64 = 3650;

/// Refund granted when cancelling at least `min_days_before_harvest` days out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct RefundTier {
    pub min_days_before_harvest: i64,
    pub refund_percent: f64,
    pub label: String,
}

/// Row of the compensation table, matched in order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct CompensationRule {
    pub trigger: CompensationTrigger,
    pub min_magnitude: f64,
    pub value: CompensationValue,
}

/// Singleton pre-order policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreOrderSetting {
    pub id: Uuid,
    pub refund_tiers: Vec<RefundTier>,
    pub compensation_rules: Vec<CompensationRule>,
    pub voucher_valid_days: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PreOrderSetting {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Self::SINGLETON_ID,
            refund_tiers: vec![
                RefundTier {
                    min_days_before_harvest: 7,
                    refund_percent: 100.0,
                    label: "7+ days before harvest".to_string(),
                },
                RefundTier {
                    min_days_before_harvest: 3,
                    refund_percent: 50.0,
                    label: "3-6 days before harvest".to_string(),
                },
                RefundTier {
                    min_days_before_harvest: 0,
                    refund_percent: 0.0,
                    label: "under 3 days before harvest".to_string(),
                },
            ],
            compensation_rules: vec![
                CompensationRule {
                    trigger: CompensationTrigger::Delay,
                    min_magnitude: 14.0,
                    value: CompensationValue::Voucher { percent: 20.0 },
                },
                CompensationRule {
                    trigger: CompensationTrigger::Delay,
                    min_magnitude: 7.0,
                    value: CompensationValue::Percent { percent: 10.0 },
                },
                CompensationRule {
                    trigger: CompensationTrigger::Delay,
                    min_magnitude: 3.0,
                    value: CompensationValue::Fixed { amount: 50_000 },
                },
                CompensationRule {
                    trigger: CompensationTrigger::Shortage,
                    min_magnitude: 30.0,
                    value: CompensationValue::Percent { percent: 20.0 },
                },
                CompensationRule {
                    trigger: CompensationTrigger::Shortage,
                    min_magnitude: 10.0,
                    value: CompensationValue::Voucher { percent: 10.0 },
                },
            ],
            voucher_valid_days: 90,
            created_at: now,
            updated_at: now,
        }
    }
}

impl PreOrderSetting {
    pub const SINGLETON_ID: Uuid = Uuid::from_u128(0x5e77_1765_0000_4000_8000_0000_0000_0002);

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
}

impl Entity for PreOrderSetting {
    const NAME: &'static str = "PreOrderSetting";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self
            .refund_tiers
            .iter()
            .any(|t| !(0.0..=100.0).contains(&t.refund_percent))
        {
            return Err("refund_percent must be between 0 and 100".to_string());
        }
        if self.compensation_rules.iter().any(|r| r.min_magnitude < 0.0) {
            return Err("compensation thresholds cannot be negative".to_string());
        }
        if !(1..=MAX_VOUCHER_VALID_DAYS).contains(&self.voucher_valid_days) {
            return Err(format!(
                "voucher_valid_days must be between 1 and {}",
                MAX_VOUCHER_VALID_DAYS
            ));
        }
        Ok(())
    }
}
