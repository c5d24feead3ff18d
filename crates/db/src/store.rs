//! Document backend emulating the remote entity service.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Connectivity failures as opposed to rejected or corrupt data
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}

/// CRUD surface of the entity backend. Documents are opaque JSON objects
/// grouped into named collections.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All documents of a collection in insertion order
    async fn list(&self, entity: &str) -> Result<Vec<Value>, StoreError>;

    async fn get(&self, entity: &str, id: Uuid) -> Result<Option<Value>, StoreError>;

    async fn insert(&self, entity: &str, id: Uuid, doc: &Value) -> Result<(), StoreError>;

    /// Returns false when no document with `id` exists
    async fn replace(&self, entity: &str, id: Uuid, doc: &Value) -> Result<bool, StoreError>;

    /// Returns false when no document with `id` exists
    async fn delete(&self, entity: &str, id: Uuid) -> Result<bool, StoreError>;
}

/// [`EntityStore`] over the `entity_records` table
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn list(&self, entity: &str) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"SELECT data
               FROM entity_records
               WHERE entity = $1
               ORDER BY rowid ASC"#,
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        debug!(entity, count = rows.len(), "Loaded entity collection");

        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
            .collect()
    }

    async fn get(&self, entity: &str, id: Uuid) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT data FROM entity_records WHERE entity = $1 AND id = $2",
        )
        .bind(entity)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    async fn insert(&self, entity: &str, id: Uuid, doc: &Value) -> Result<(), StoreError> {
        let data = serde_json::to_string(doc)?;
        sqlx::query("INSERT INTO entity_records (id, entity, data) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(entity)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace(&self, entity: &str, id: Uuid, doc: &Value) -> Result<bool, StoreError> {
        let data = serde_json::to_string(doc)?;
        let result = sqlx::query(
            r#"UPDATE entity_records
               SET data = $3,
                   updated_at = datetime('now', 'subsec')
               WHERE entity = $1 AND id = $2"#,
        )
        .bind(entity)
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, entity: &str, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM entity_records WHERE entity = $1 AND id = $2")
            .bind(entity)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let db = DBService::new_in_memory().await.unwrap();
        let store = SqliteStore::new(db.pool.clone());
        let id = Uuid::new_v4();

        store
            .insert("Order", id, &json!({"id": id, "total_amount": 100}))
            .await
            .unwrap();

        assert_eq!(store.list("Order").await.unwrap().len(), 1);
        assert!(store.list("Product").await.unwrap().is_empty());
        assert!(store.get("Product", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_delete_report_missing_rows() {
        let db = DBService::new_in_memory().await.unwrap();
        let store = SqliteStore::new(db.pool.clone());
        let id = Uuid::new_v4();

        assert!(!store.replace("Order", id, &json!({})).await.unwrap());
        assert!(!store.delete("Order", id).await.unwrap());

        store.insert("Order", id, &json!({"n": 1})).await.unwrap();
        assert!(store.replace("Order", id, &json!({"n": 2})).await.unwrap());
        assert_eq!(store.get("Order", id).await.unwrap(), Some(json!({"n": 2})));
        assert!(store.delete("Order", id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_unique_violation() {
        let db = DBService::new_in_memory().await.unwrap();
        let store = SqliteStore::new(db.pool.clone());
        let id = Uuid::new_v4();

        store.insert("Order", id, &json!({})).await.unwrap();
        let err = store.insert("Order", id, &json!({})).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert!(!err.is_transport());
    }
}
