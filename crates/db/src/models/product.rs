use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::entity::Entity;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub stock: i64,
    pub is_preorder: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Product {
    const NAME: &'static str = "Product";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.price < 0 {
            return Err("price cannot be negative".to_string());
        }
        if self.stock < 0 {
            return Err("stock cannot be negative".to_string());
        }
        Ok(())
    }
}
