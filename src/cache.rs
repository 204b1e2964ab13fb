//! 共享快取
//!
//! 把伺服器與玩家的當前狀態寫入 Redis，讓其他進程（代理、插件）可以直接讀取。
//! 所有寫入都經由單一背景任務依序執行，呼叫端不等待結果。

pub mod keys;
pub mod store;
pub mod traits;

pub use keys::{cache_key, PLAYER_PREFIX, SERVER_PREFIX};
pub use store::{CacheError, CacheStore, MemoryCacheStore, RedisCacheStore};
pub use traits::Cacheable;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum CacheOp {
    Set { key: String, value: String },
    Delete { key: String },
    Flush(oneshot::Sender<()>),
}

/// 快取寫入器
#[derive(Clone)]
pub struct CloudCache {
    sender: mpsc::UnboundedSender<CacheOp>,
    store: Arc<dyn CacheStore>,
}

impl CloudCache {
    /// 建立快取並啟動寫入任務，必須在 tokio 執行環境內呼叫
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let writer = store.clone();

        tokio::spawn(async move {
            while let Some(op) = receiver.recv().await {
                match op {
                    CacheOp::Set { key, value } => {
                        if let Err(e) = writer.set(&key, value).await {
                            warn!(key = %key, "快取寫入失敗: {}", e);
                        }
                    }
                    CacheOp::Delete { key } => {
                        if let Err(e) = writer.delete(&key).await {
                            warn!(key = %key, "快取刪除失敗: {}", e);
                        }
                    }
                    CacheOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("快取寫入任務結束");
        });

        Self { sender, store }
    }

    /// 僅存在記憶體的快取
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// 寫入物件的最新狀態
    pub fn update<T: Cacheable + ?Sized>(&self, item: &T) {
        let key = item.cache_key();
        match serde_json::to_string(&item.to_document()) {
            Ok(value) => {
                let _ = self.sender.send(CacheOp::Set { key, value });
            }
            Err(e) => warn!(key = %key, "快取序列化失敗: {}", e),
        }
    }

    /// 移除物件
    pub fn remove<T: Cacheable + ?Sized>(&self, item: &T) {
        let _ = self.sender.send(CacheOp::Delete {
            key: item.cache_key(),
        });
    }

    /// 以鍵移除
    pub fn remove_key(&self, key: impl Into<String>) {
        let _ = self.sender.send(CacheOp::Delete { key: key.into() });
    }

    /// 等待已排入的寫入完成
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(CacheOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// 直接讀取原始值
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.store.get(key).await
    }
}
