//! 發布/訂閱傳輸層抽象
//!
//! 消息代理只依賴這個介面；正式環境使用 Redis 實現，測試使用進程內實現。

use crate::messaging::error::TransportError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::warn;

/// 從訂閱流收到的一筆原始消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub channel: String,
    pub payload: String,
}

pub type TransportStream = BoxStream<'static, Result<TransportMessage, TransportError>>;

/// 發布/訂閱傳輸介面
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 發布到指定頻道
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError>;

    /// 訂閱頻道，流結束代表連接已斷開
    async fn subscribe(&self, channels: &[String]) -> Result<TransportStream, TransportError>;

    /// 釋放傳輸資源
    async fn close(&self);
}

/// 進程內廣播傳輸
pub struct MemoryTransport {
    sender: broadcast::Sender<TransportMessage>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// 監看所有經過此傳輸的消息
    pub fn tap(&self) -> broadcast::Receiver<TransportMessage> {
        self.sender.subscribe()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // 沒有訂閱者不算錯誤
        let _ = self.sender.send(TransportMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<TransportStream, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let wanted: HashSet<String> = channels.iter().map(|c| c.to_lowercase()).collect();
        let receiver = self.sender.subscribe();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let wanted = wanted.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if wanted.contains(&message.channel) => {
                            return Some((Ok(message), receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "內存傳輸訂閱者落後，已丟棄部分消息");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_filters_channels() {
        let transport = MemoryTransport::new();
        let mut stream = transport
            .subscribe(&["cloud".to_string()])
            .await
            .expect("subscribe");

        transport.publish("lobby-1", "ignored".into()).await.unwrap();
        transport.publish("cloud", "hello".into()).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.channel, "cloud");
        assert_eq!(received.payload, "hello");
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_publish() {
        let transport = MemoryTransport::new();
        transport.close().await;
        assert!(transport.publish("cloud", "x".into()).await.is_err());
    }
}
