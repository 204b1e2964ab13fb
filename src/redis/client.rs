use crate::config::types::RedisConfig;
use redis::{aio::PubSub, Client as RedisClient, RedisError};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error};

/// Redis客戶端錯誤
#[derive(Error, Debug)]
pub enum RedisClientError {
    /// Redis連接錯誤
    #[error("Redis連接錯誤: {0}")]
    ConnectionError(#[from] RedisError),

    /// 操作超時錯誤
    #[error("Redis操作超時: {0}")]
    TimeoutError(String),
}

/// Redis客戶端，負責建立專用的訂閱連接
pub struct Client {
    client: RedisClient,
    config: RedisConfig,
}

impl Client {
    /// 創建新的Redis客戶端
    pub fn new(config: RedisConfig) -> Result<Self, RedisClientError> {
        let client = RedisClient::open(config.url()).map_err(RedisClientError::ConnectionError)?;

        Ok(Self { client, config })
    }

    /// 建立訂閱連接
    pub async fn get_pubsub(&self) -> Result<PubSub, RedisClientError> {
        let connect_timeout = self.config.connection_timeout();

        match timeout(connect_timeout, self.client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => {
                debug!("成功建立Redis訂閱連接");
                Ok(pubsub)
            }
            Ok(Err(err)) => {
                error!("無法建立Redis訂閱連接: {}", err);
                Err(RedisClientError::ConnectionError(err))
            }
            Err(_) => {
                error!("Redis連接超時 ({}秒)", self.config.connection_timeout_secs);
                Err(RedisClientError::TimeoutError(format!(
                    "連接超時 ({}秒)",
                    self.config.connection_timeout_secs
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::pool::ConnectionPool;
    use crate::redis::test_config::RedisTestConfig;
    use futures::StreamExt;

    #[test]
    fn test_client_open_does_not_connect() {
        // redis::Client::open 只解析 URL，不會連線
        let config = RedisTestConfig::create_test_config();
        assert!(Client::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_pubsub_receives_published_message() {
        if RedisTestConfig::skip_if_redis_unavailable("test_pubsub_receives_published_message")
            .await
            .is_none()
        {
            return;
        }

        let config = RedisTestConfig::create_test_config();
        let client = Client::new(config.clone()).expect("無法創建Redis客戶端");
        let mut pubsub = client.get_pubsub().await.expect("無法建立訂閱連接");
        pubsub.subscribe("cloud-client-test").await.expect("訂閱失敗");

        let pool = ConnectionPool::new(&config).expect("連接池");
        pool.publish("cloud-client-test", "hello".into())
            .await
            .expect("發布失敗");

        let mut messages = pubsub.into_on_message().boxed();
        let message = tokio::time::timeout(std::time::Duration::from_secs(2), messages.next())
            .await
            .expect("等待消息逾時")
            .expect("訂閱流結束");
        assert_eq!(message.get_payload::<String>().unwrap(), "hello");
    }
}
