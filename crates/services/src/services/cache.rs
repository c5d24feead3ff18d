//! Query cache shared by read paths, invalidated by write paths.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use db::{RepoResult, RepositoryError};
use moka::future::Cache;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Handle services use to drop stale query results after a write
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, key: &str);

    async fn invalidate_prefix(&self, prefix: &str);
}

/// Cache keys shared between readers and writers
pub mod keys {
    use super::Uuid;

    pub fn member(member_id: Uuid) -> String {
        format!("member:{}", member_id)
    }

    pub fn member_summary(member_id: Uuid) -> String {
        format!("member:{}:summary", member_id)
    }

    /// Member id owning a referral code
    pub fn referral_code(code: &str) -> String {
        format!("code:{}", code.trim().to_uppercase())
    }

    pub const DASHBOARD: &str = "referral:dashboard";

    pub fn order(order_id: Uuid) -> String {
        format!("order:{}", order_id)
    }

    pub fn lot(lot_id: Uuid) -> String {
        format!("lot:{}", lot_id)
    }
}

/// Time-bounded JSON cache of query results
#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<String, Value>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(10_000).time_to_live(ttl).build(),
        }
    }

    /// Cached value for `key`, loading and storing it on a miss
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> RepoResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepoResult<T>>,
    {
        if let Some(hit) = self.inner.get(key).await {
            if let Ok(value) = serde_json::from_value(hit) {
                return Ok(value);
            }
        }

        let value = load().await?;
        let json = serde_json::to_value(&value).map_err(|e| RepositoryError::Server(e.to_string()))?;
        self.inner.insert(key.to_string(), json).await;
        Ok(value)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.get(key).await.is_some()
    }
}

#[async_trait]
impl CacheInvalidator for QueryCache {
    async fn invalidate(&self, key: &str) {
        debug!(key, "Invalidating cached query");
        self.inner.invalidate(key).await;
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        let stale: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        debug!(prefix, count = stale.len(), "Invalidating cached queries");
        for key in stale {
            self.inner.invalidate(key.as_str()).await;
        }
    }
}

/// Invalidator for contexts without a cache
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, _key: &str) {}

    async fn invalidate_prefix(&self, _prefix: &str) {}
}
