use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter, SortOrder},
    repository::{RepoResult, Repository},
};

/// Append-only record of a state-changing action
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_name: String,
    pub entity_id: Uuid,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(actor: &str, action: &str, entity_name: &str, entity_id: Uuid, details: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity_name: entity_name.to_string(),
            entity_id,
            details,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn find_by_entity(repo: &Repository<Self>, entity_id: Uuid) -> RepoResult<Vec<Self>> {
        repo.filter(
            &Filter::new().eq("entity_id", entity_id),
            Some(&SortOrder::asc("created_at")),
            None,
        )
        .await
    }
}

impl Entity for AuditLog {
    const NAME: &'static str = "AuditLog";
    const APPEND_ONLY: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.actor.trim().is_empty() || self.action.trim().is_empty() {
            return Err("audit entries require actor and action".to_string());
        }
        Ok(())
    }
}
