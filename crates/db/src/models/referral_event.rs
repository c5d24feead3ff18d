use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter, SortOrder},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReferralEventStatus {
    #[default]
    Calculated,
    Paid,
    Fraudulent,
}

/// One commission-bearing transaction tied to an order. The commission is
/// fixed at creation; only a fraud reversal changes it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferralEvent {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub order_id: Uuid,
    pub customer_email: String,
    pub order_amount: i64,
    pub commission_rate: f64,
    pub commission_amount: i64,
    pub tier_label: String,
    pub status: ReferralEventStatus,
    pub period_month: String,
    pub fraud_reasons: Vec<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReferralEvent {
    pub async fn find_by_order(repo: &Repository<Self>, order_id: Uuid) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("order_id", order_id)).await
    }

    pub async fn find_by_referrer(
        repo: &Repository<Self>,
        referrer_id: Uuid,
        status: Option<ReferralEventStatus>,
    ) -> RepoResult<Vec<Self>> {
        let mut filter = Filter::new().eq("referrer_id", referrer_id);
        if let Some(status) = status {
            filter = filter.eq("status", status);
        }
        repo.filter(&filter, Some(&SortOrder::desc("created_at")), None)
            .await
    }

    /// Events for a customer created at or after `since`
    pub async fn count_for_customer_since(
        repo: &Repository<Self>,
        customer_email: &str,
        since: DateTime<Utc>,
    ) -> RepoResult<usize> {
        let events = repo
            .filter(&Filter::new().eq("customer_email", customer_email), None, None)
            .await?;
        Ok(events.iter().filter(|e| e.created_at >= since).count())
    }
}

impl Entity for ReferralEvent {
    const NAME: &'static str = "ReferralEvent";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.order_amount < 0 || self.commission_amount < 0 {
            return Err("order and commission amounts cannot be negative".to_string());
        }
        if self.status == ReferralEventStatus::Paid && self.paid_at.is_none() {
            return Err("paid events require paid_at".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("order_id", Value::String(self.order_id.to_string()))]
    }
}
