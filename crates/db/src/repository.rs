//! Typed CRUD over entity collections with explicit result values.

use std::{marker::PhantomData, sync::Arc};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use utils::response::{ErrorCode, HasErrorCode};
use uuid::Uuid;

use crate::{
    entity::{Entity, Filter, SortOrder},
    store::{EntityStore, StoreError},
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{entity} with {field} = {value} already exists")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("server error: {0}")]
    Server(String),
}

impl RepositoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Duplicate { .. } => ErrorCode::DuplicateEntry,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Server(_) => ErrorCode::ServerError,
        }
    }
}

impl HasErrorCode for RepositoryError {
    fn error_code(&self) -> ErrorCode {
        self.code()
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        if e.is_transport() {
            Self::Network(e.to_string())
        } else {
            Self::Server(e.to_string())
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// CRUD wrapper for one entity collection
pub struct Repository<T: Entity> {
    store: Arc<dyn EntityStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub async fn list(&self, sort: Option<&SortOrder>, limit: Option<usize>) -> RepoResult<Vec<T>> {
        self.filter(&Filter::new(), sort, limit).await
    }

    pub async fn filter(
        &self,
        filter: &Filter,
        sort: Option<&SortOrder>,
        limit: Option<usize>,
    ) -> RepoResult<Vec<T>> {
        let mut docs: Vec<Value> = self
            .store
            .list(T::NAME)
            .await?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect();

        if let Some(sort) = sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = limit {
            docs.truncate(limit);
        }

        docs.into_iter().map(Self::decode).collect()
    }

    pub async fn find_one(&self, filter: &Filter) -> RepoResult<Option<T>> {
        Ok(self.filter(filter, None, Some(1)).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<T>> {
        self.store
            .get(T::NAME, id)
            .await?
            .map(Self::decode)
            .transpose()
    }

    pub async fn get_by_id(&self, id: Uuid) -> RepoResult<T> {
        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound {
            entity: T::NAME,
            id,
        })
    }

    pub async fn create(&self, entity: T) -> RepoResult<T> {
        entity.validate().map_err(RepositoryError::Validation)?;
        self.ensure_unique(&entity).await?;

        let doc = Self::encode(&entity)?;
        self.store
            .insert(T::NAME, entity.id(), &doc)
            .await
            .map_err(|e| self.map_write_error(e, entity.id()))?;

        debug!(entity = T::NAME, id = %entity.id(), "Created entity");
        Ok(entity)
    }

    /// Create from an untyped payload. `id`, `created_at` and `updated_at`
    /// are filled in when absent; anything else missing is a validation
    /// failure.
    pub async fn create_from_value(&self, value: Value) -> RepoResult<T> {
        let Value::Object(mut fields) = value else {
            return Err(RepositoryError::Validation(format!(
                "{} payload must be a JSON object",
                T::NAME
            )));
        };

        let now = serde_json::to_value(Utc::now())
            .map_err(|e| RepositoryError::Server(e.to_string()))?;
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields.entry("created_at").or_insert_with(|| now.clone());
        fields.entry("updated_at").or_insert(now);

        let entity: T = serde_json::from_value(Value::Object(fields))
            .map_err(|e| RepositoryError::Validation(format!("invalid {}: {}", T::NAME, e)))?;
        self.create(entity).await
    }

    /// Apply a JSON merge patch to the stored document
    pub async fn update(&self, id: Uuid, patch: &Value) -> RepoResult<T> {
        self.reject_append_only("update")?;

        let mut doc = self
            .store
            .get(T::NAME, id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: T::NAME,
                id,
            })?;
        json_patch::merge(&mut doc, patch);
        doc["id"] = Value::String(id.to_string());

        let entity: T = serde_json::from_value(doc)
            .map_err(|e| RepositoryError::Validation(format!("invalid {}: {}", T::NAME, e)))?;
        self.save(&entity).await
    }

    /// Replace the stored document with `entity`
    pub async fn save(&self, entity: &T) -> RepoResult<T> {
        self.reject_append_only("update")?;

        let mut entity = entity.clone();
        entity.touch(Utc::now());
        entity.validate().map_err(RepositoryError::Validation)?;
        self.ensure_unique(&entity).await?;

        let doc = Self::encode(&entity)?;
        let replaced = self
            .store
            .replace(T::NAME, entity.id(), &doc)
            .await
            .map_err(|e| self.map_write_error(e, entity.id()))?;
        if !replaced {
            return Err(RepositoryError::NotFound {
                entity: T::NAME,
                id: entity.id(),
            });
        }
        Ok(entity)
    }

    pub async fn delete(&self, id: Uuid) -> RepoResult<()> {
        self.reject_append_only("delete")?;

        if !self.store.delete(T::NAME, id).await? {
            return Err(RepositoryError::NotFound {
                entity: T::NAME,
                id,
            });
        }
        debug!(entity = T::NAME, id = %id, "Deleted entity");
        Ok(())
    }

    async fn ensure_unique(&self, entity: &T) -> RepoResult<()> {
        let keys = entity.unique_keys();
        if keys.is_empty() {
            return Ok(());
        }

        let docs = self.store.list(T::NAME).await?;
        let own_id = Value::String(entity.id().to_string());
        for (field, value) in keys {
            let clash = docs
                .iter()
                .filter(|doc| doc.get("id") != Some(&own_id))
                .any(|doc| doc.get(field) == Some(&value));
            if clash {
                return Err(RepositoryError::Duplicate {
                    entity: T::NAME,
                    field,
                    value: value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
                });
            }
        }
        Ok(())
    }

    fn reject_append_only(&self, operation: &str) -> RepoResult<()> {
        if T::APPEND_ONLY {
            return Err(RepositoryError::Validation(format!(
                "{} is append-only and does not support {}",
                T::NAME,
                operation
            )));
        }
        Ok(())
    }

    fn map_write_error(&self, e: StoreError, id: Uuid) -> RepositoryError {
        if e.is_unique_violation() {
            return RepositoryError::Duplicate {
                entity: T::NAME,
                field: "id",
                value: id.to_string(),
            };
        }
        warn!(entity = T::NAME, id = %id, error = %e, "Entity write failed");
        e.into()
    }

    fn encode(entity: &T) -> RepoResult<Value> {
        serde_json::to_value(entity).map_err(|e| RepositoryError::Server(e.to_string()))
    }

    fn decode(doc: Value) -> RepoResult<T> {
        serde_json::from_value(doc)
            .map_err(|e| RepositoryError::Server(format!("corrupt {} document: {}", T::NAME, e)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        DBService,
        models::{audit_log::AuditLog, customer::Customer},
    };

    async fn customers() -> Repository<Customer> {
        let db = DBService::new_in_memory().await.unwrap();
        Repository::new(db.store())
    }

    #[tokio::test]
    async fn test_create_from_value_missing_field_is_validation_error() {
        let repo = customers().await;

        let err = repo
            .create_from_value(json!({"email": "an@example.vn"}))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(repo.list(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_from_value_fills_identity_and_timestamps() {
        let repo = customers().await;

        let customer = repo
            .create_from_value(json!({
                "email": "an@example.vn",
                "full_name": "Nguyen An",
                "phone": null,
                "referrer_id": null
            }))
            .await
            .unwrap();

        let stored = repo.get_by_id(customer.id).await.unwrap();
        assert_eq!(stored.full_name, "Nguyen An");
    }

    #[tokio::test]
    async fn test_business_validation_rejects_create() {
        let repo = customers().await;
        let err = repo
            .create(Customer::new("not-an-email", "An", None, Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_unique_key_is_duplicate_entry() {
        let repo = customers().await;
        repo.create(Customer::new("an@example.vn", "An", None, Utc::now()))
            .await
            .unwrap();

        let err = repo
            .create(Customer::new("AN@example.vn", "Another An", None, Utc::now()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::DuplicateEntry);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = customers().await;
        let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = repo.delete(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_update_applies_merge_patch_and_keeps_id() {
        let repo = customers().await;
        let customer = repo
            .create(Customer::new("an@example.vn", "An", None, Utc::now()))
            .await
            .unwrap();

        let updated = repo
            .update(
                customer.id,
                &json!({"id": Uuid::new_v4(), "full_name": "Tran An", "phone": "0901"}),
            )
            .await
            .unwrap();

        assert_eq!(updated.id, customer.id);
        assert_eq!(updated.full_name, "Tran An");
        assert_eq!(updated.phone.as_deref(), Some("0901"));
        assert!(updated.updated_at >= customer.updated_at);

        let err = repo
            .update(customer.id, &json!({"full_name": ""}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_filter_sort_and_limit() {
        let repo = customers().await;
        let referrer = Uuid::new_v4();
        for (email, name) in [("c@x.vn", "C"), ("a@x.vn", "A"), ("b@x.vn", "B")] {
            repo.create(Customer::new(email, name, Some(referrer), Utc::now()))
                .await
                .unwrap();
        }
        repo.create(Customer::new("z@x.vn", "Z", None, Utc::now()))
            .await
            .unwrap();

        let names: Vec<String> = repo
            .filter(
                &Filter::new().eq("referrer_id", referrer),
                Some(&SortOrder::asc("full_name")),
                Some(2),
            )
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.full_name)
            .collect();

        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_append_only_rejects_update_and_delete() {
        let db = DBService::new_in_memory().await.unwrap();
        let repo: Repository<AuditLog> = Repository::new(db.store());
        let entry = repo
            .create(AuditLog::new("admin", "approve", "ReferralMember", Uuid::new_v4(), json!({})))
            .await
            .unwrap();

        let err = repo.update(entry.id, &json!({"action": "x"})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        let err = repo.delete(entry.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(repo.list(None, None).await.unwrap().len(), 1);
    }
}
