//! 共享的 Redis 連接池
//!
//! 發布消息與快取讀寫都經由這裡取得連接；訂閱使用 `Client` 的專用連接。

use crate::config::types::RedisConfig;
use deadpool::managed::QueueMode;
use deadpool_redis::{
    redis::{AsyncCommands, RedisError},
    Config, Connection, CreatePoolError, Pool, PoolConfig, PoolError, Runtime, Timeouts,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Redis連接池錯誤
#[derive(Error, Debug)]
pub enum RedisPoolError {
    #[error("Redis連接池初始化錯誤: {0}")]
    Init(#[from] CreatePoolError),

    #[error("無法從連接池獲取連接: {0}")]
    Connection(#[from] PoolError),

    #[error("Redis命令錯誤: {0}")]
    Command(#[from] RedisError),
}

pub struct ConnectionPool {
    pool: Pool,
}

impl ConnectionPool {
    /// 建立連接池，第一次取用時才會連線
    pub fn new(config: &RedisConfig) -> Result<Self, RedisPoolError> {
        let mut cfg = Config::from_url(config.url());
        cfg.pool = Some(PoolConfig {
            max_size: config.pool_size as usize,
            timeouts: Timeouts {
                wait: Some(config.connection_timeout()),
                create: Some(config.connection_timeout()),
                recycle: Some(Duration::from_secs(60)),
            },
            queue_mode: QueueMode::Fifo,
        });

        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        info!(size = config.pool_size, db = config.db, "Redis連接池已建立");

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, RedisPoolError> {
        Ok(self.pool.get().await?)
    }

    /// 發布到頻道，返回收到消息的訂閱者數量
    pub async fn publish(&self, channel: &str, payload: String) -> Result<i64, RedisPoolError> {
        let mut conn = self.conn().await?;
        Ok(conn.publish(channel, payload).await?)
    }

    pub async fn set(&self, key: &str, value: String) -> Result<(), RedisPoolError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), RedisPoolError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisPoolError> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    /// 關閉連接池，之後的取用都會失敗
    pub fn close(&self) {
        self.pool.close();
        debug!("Redis連接池已關閉");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
