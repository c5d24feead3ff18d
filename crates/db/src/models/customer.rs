use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter},
    repository::{RepoResult, Repository},
};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub referrer_id: Option<Uuid>, // Referral member credited for this customer
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(email: &str, full_name: &str, referrer_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            full_name: full_name.trim().to_string(),
            phone: None,
            referrer_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn find_by_email(repo: &Repository<Self>, email: &str) -> RepoResult<Option<Self>> {
        repo.find_one(&Filter::new().eq("email", email.trim().to_lowercase()))
            .await
    }
}

impl Entity for Customer {
    const NAME: &'static str = "Customer";

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if !self.email.contains('@') {
            return Err(format!("invalid email: {}", self.email));
        }
        if self.full_name.trim().is_empty() {
            return Err("full_name is required".to_string());
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        vec![("email", Value::String(self.email.clone()))]
    }
}
