use crate::cache::keys::cache_key;
use serde::Serialize;

/// 可寫入共享快取的物件
///
/// 實現者提供鍵前綴、唯一識別與序列化用的快照文件。
pub trait Cacheable {
    /// 快取鍵前綴
    const CACHE_PREFIX: &'static str;

    /// 寫入快取的文件類型
    type Document: Serialize;

    fn cache_id(&self) -> String;

    fn to_document(&self) -> Self::Document;

    fn cache_key(&self) -> String {
        cache_key(Self::CACHE_PREFIX, &self.cache_id())
    }
}
