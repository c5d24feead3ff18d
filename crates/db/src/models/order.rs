use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub total_amount: i64,
    pub referral_code: Option<String>,
    pub lot_id: Option<Uuid>, // Set for pre-orders
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        order_number: &str,
        customer_email: &str,
        total_amount: i64,
        referral_code: Option<String>,
        lot_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.to_string(),
            customer_email: customer_email.trim().to_lowercase(),
            total_amount,
            referral_code,
            lot_id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn find_by_lot(repo: &Repository<Self>, lot_id: Uuid) -> RepoResult<Vec<Self>> {
        repo.filter(&Filter::new().eq("lot_id", lot_id), None, None)
            .await
    }
}

impl Entity for Order {
    const NAME: &'static str = "Order";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_number.trim().is_empty() {
            return Err("order_number is required".to_string());
        }
        if !self.customer_email.contains('@') {
            return Err(format!("invalid customer_email: {}", self.customer_email));
        }
        if self.total_amount <= 0 {
            return Err("total_amount must be positive".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("order_number", Value::String(self.order_number.clone()))]
    }
}
