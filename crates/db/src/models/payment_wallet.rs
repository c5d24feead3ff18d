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
pub enum WalletStatus {
    #[default]
    Held,
    Released,
    Refunded,
}

/// Escrow record for one pre-order
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentWallet {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_email: String,
    pub deposit_amount: i64,
    pub remaining_amount: i64,
    pub refunded_amount: i64,
    pub compensated_amount: i64,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentWallet {
    pub fn new(
        order_id: Uuid,
        customer_email: &str,
        deposit_amount: i64,
        remaining_amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            customer_email: customer_email.to_string(),
            deposit_amount,
            remaining_amount,
            refunded_amount: 0,
            compensated_amount: 0,
            status: WalletStatus::Held,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full order value the wallet secures
    pub fn order_value(&self) -> i64 {
        self.deposit_amount + self.remaining_amount
    }

    pub async fn find_by_order(repo: &Repository<Self>, order_id: Uuid) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("order_id", order_id)).await
    }
}

impl Entity for PaymentWallet {
    const NAME: &'static str = "PaymentWallet";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.deposit_amount <= 0 {
            return Err("deposit_amount must be positive".to_string());
        }
        if self.remaining_amount < 0 || self.refunded_amount < 0 || self.compensated_amount < 0 {
            return Err("wallet amounts cannot be negative".to_string());
        }
        if self.refunded_amount > self.deposit_amount {
            return Err("refunded_amount exceeds deposit".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("order_id", Value::String(self.order_id.to_string()))]
    }
}
