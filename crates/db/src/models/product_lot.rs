use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::entity::Entity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LotStatus {
    #[default]
    Open,
    Delayed,
    Short,
    Harvested,
    Closed,
}

/// A harvest batch that pre-orders are placed against
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductLot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub lot_code: String,
    pub harvest_date: NaiveDate,
    pub original_harvest_date: NaiveDate, // Baseline for delay compensation
    pub expected_quantity: i64,
    pub actual_quantity: Option<i64>,
    pub status: LotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductLot {
    pub fn new(
        product_id: Uuid,
        lot_code: &str,
        harvest_date: NaiveDate,
        expected_quantity: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            lot_code: lot_code.to_string(),
            harvest_date,
            original_harvest_date: harvest_date,
            expected_quantity,
            actual_quantity: None,
            status: LotStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for ProductLot {
    const NAME: &'static str = "ProductLot";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.lot_code.trim().is_empty() {
            return Err("lot_code is required".to_string());
        }
        if self.expected_quantity <= 0 {
            return Err("expected_quantity must be positive".to_string());
        }
        if self.actual_quantity.is_some_and(|q| q < 0) {
            return Err("actual_quantity cannot be negative".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("lot_code", Value::String(self.lot_code.clone()))]
    }
}
