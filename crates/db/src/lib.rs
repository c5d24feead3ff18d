use std::{str::FromStr, sync::Arc};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

pub mod entity;
pub mod models;
pub mod repository;
pub mod store;

pub use entity::{Entity, Filter, SortOrder};
pub use repository::{RepoResult, Repository, RepositoryError};
pub use store::{EntityStore, SqliteStore, StoreError};

/// Owns the SQLite pool backing every entity collection
#[derive(Clone)]
pub struct DBService {
    pub pool: SqlitePool,
}

impl DBService {
    /// Connect to `database_url` and apply pending migrations
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(database_url, "Database ready");
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        // A single connection that never expires, otherwise the in-memory
        // database is dropped together with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        Arc::new(SqliteStore::new(self.pool.clone()))
    }
}
