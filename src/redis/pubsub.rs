//! 以 Redis 發布/訂閱實現的傳輸層
//!
//! 發布走共享連接池，訂閱使用獨立的 PubSub 連接；兩者互不影響。

use crate::config::types::RedisConfig;
use crate::messaging::error::TransportError;
use crate::messaging::transport::{Transport, TransportMessage, TransportStream};
use crate::redis::client::Client;
use crate::redis::pool::ConnectionPool;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RedisTransport {
    pool: Arc<ConnectionPool>,
    client: Client,
}

impl RedisTransport {
    pub fn new(config: RedisConfig) -> Result<Self, TransportError> {
        let pool =
            ConnectionPool::new(&config).map_err(|e| TransportError::Connection(e.to_string()))?;
        let client = Client::new(config).map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
            client,
        })
    }

    /// 共享連接池，快取層也使用它
    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        let receivers = self
            .pool
            .publish(channel, payload)
            .await
            .map_err(|e| TransportError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        debug!(channel, receivers, "已發布消息");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<TransportStream, TransportError> {
        let mut pubsub = self
            .client
            .get_pubsub()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        pubsub
            .subscribe(channels.to_vec())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(?channels, "已訂閱 Redis 頻道");

        let stream = pubsub.into_on_message().map(|msg| {
            let channel = msg.get_channel_name().to_string();
            msg.get_payload::<String>()
                .map(|payload| TransportMessage { channel, payload })
                .map_err(|e| TransportError::Connection(e.to_string()))
        });

        Ok(stream.boxed())
    }

    async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.close();
        info!("Redis 傳輸層已關閉");
    }
}
