use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::entity::Entity;

/// Record of a cancelled pre-order and the refund it earned
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreOrderCancellation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub wallet_id: Uuid,
    pub reason: String,
    pub days_before_harvest: i64,
    pub refund_percent: f64,
    pub refund_amount: i64,
    pub tier_label: String,
    pub cancelled_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for PreOrderCancellation {
    const NAME: &'static str = "PreOrderCancellation";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("cancellation reason is required".to_string());
        }
        if !(0.0..=100.0).contains(&self.refund_percent) || self.refund_amount < 0 {
            return Err("refund must be between 0 and 100 percent".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("order_id", Value::String(self.order_id.to_string()))]
    }
}
