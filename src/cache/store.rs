use crate::redis::pool::ConnectionPool;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("快取後端錯誤: {0}")]
    Backend(String),
}

/// 快取後端
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
}

/// Redis 後端，與傳輸層共用連接池
pub struct RedisCacheStore {
    pool: Arc<ConnectionPool>,
}

impl RedisCacheStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.pool
            .set(key, value)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.pool
            .del(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.pool
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

/// 記憶體後端
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, String>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::test_config::RedisTestConfig;

    #[tokio::test]
    async fn test_redis_cache_store() {
        if RedisTestConfig::skip_if_redis_unavailable("test_redis_cache_store")
            .await
            .is_none()
        {
            return;
        }

        let pool = Arc::new(ConnectionPool::new(&RedisTestConfig::create_test_config()).unwrap());
        let store = RedisCacheStore::new(pool);

        store.set("server:CACHE-TEST", "{}".into()).await.unwrap();
        assert_eq!(
            store.get("server:CACHE-TEST").await.unwrap().as_deref(),
            Some("{}")
        );
        store.delete("server:CACHE-TEST").await.unwrap();
        assert_eq!(store.get("server:CACHE-TEST").await.unwrap(), None);
    }
}
