use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompensationTrigger {
    /// Magnitude is days late
    Delay,
    /// Magnitude is percent of expected quantity missing
    Shortage,
}

/// What a matched rule pays out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompensationValue {
    Fixed { amount: i64 },
    Percent { percent: f64 },
    /// Voucher worth `percent` of the order value
    Voucher { percent: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AutoCompensation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub wallet_id: Uuid,
    pub lot_id: Uuid,
    pub trigger: CompensationTrigger,
    pub magnitude: f64,
    pub value: CompensationValue,
    pub amount: i64,
    pub voucher_code: Option<String>,
    pub voucher_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoCompensation {
    pub async fn find_for_order(
        repo: &Repository<Self>,
        order_id: Uuid,
        trigger: CompensationTrigger,
    ) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("order_id", order_id).eq("trigger", trigger))
            .await
    }
}

impl Entity for AutoCompensation {
    const NAME: &'static str = "AutoCompensation";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.amount < 0 {
            return Err("compensation amount cannot be negative".to_string());
        }
        if matches!(self.value, CompensationValue::Voucher { .. }) && self.voucher_code.is_none() {
            return Err("voucher compensation requires a voucher code".to_string());
        }
        Ok(())
    }
}
