//! 集中化的 Redis 測試配置

use crate::config::types::RedisConfig;
use crate::redis::pool::ConnectionPool;

/// Redis 測試配置建構器
pub struct RedisTestConfig;

impl RedisTestConfig {
    /// 建立標準測試 Redis 配置
    ///
    /// 可用 REDIS_TEST_HOST / REDIS_TEST_PORT 覆蓋
    pub fn create_test_config() -> RedisConfig {
        let host = std::env::var("REDIS_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("REDIS_TEST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(6379);

        RedisConfig {
            host,
            port,
            db: 15,
            pool_size: 3,
            connection_timeout_secs: 1,
            reconnect_delay_secs: 1,
        }
    }

    /// 檢查 Redis 是否可用於測試
    pub async fn is_redis_available() -> bool {
        match ConnectionPool::new(&Self::create_test_config()) {
            Ok(pool) => pool.get("cloud:availability").await.is_ok(),
            Err(_) => false,
        }
    }

    /// Redis 不可用時返回 None，讓測試直接略過
    pub async fn skip_if_redis_unavailable(test_name: &str) -> Option<()> {
        if Self::is_redis_available().await {
            Some(())
        } else {
            eprintln!("略過 Redis 測試 '{}' - Redis 環境不可用", test_name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_config() {
        let config = RedisTestConfig::create_test_config();
        assert!(config.url().starts_with("redis://"));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.db, 15);
    }
}
