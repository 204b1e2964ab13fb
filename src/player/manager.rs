use crate::cache::{cache_key, CloudCache, PLAYER_PREFIX};
use crate::player::cloud_player::CloudPlayer;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 線上玩家註冊表，可依 UUID 或名稱（不分大小寫）查詢
pub struct PlayerManager {
    by_uuid: DashMap<Uuid, Arc<CloudPlayer>>,
    by_name: DashMap<String, Uuid>,
    cache: CloudCache,
}

impl PlayerManager {
    pub fn new(cache: CloudCache) -> Self {
        Self {
            by_uuid: DashMap::new(),
            by_name: DashMap::new(),
            cache,
        }
    }

    pub fn add_player(&self, player: Arc<CloudPlayer>) {
        debug!(player = %player.name(), uuid = %player.uuid(), "新增玩家");
        self.by_name
            .insert(player.name().to_lowercase(), player.uuid());
        self.cache.update(player.as_ref());
        self.by_uuid.insert(player.uuid(), player);
    }

    /// 移除玩家與其快取，不存在時仍清除快取鍵
    pub fn remove_player(&self, uuid: &Uuid) -> Option<Arc<CloudPlayer>> {
        match self.by_uuid.remove(uuid) {
            Some((_, player)) => {
                self.by_name
                    .remove_if(&player.name().to_lowercase(), |_, id| id == uuid);
                self.cache.remove(player.as_ref());
                debug!(player = %player.name(), "已移除玩家");
                Some(player)
            }
            None => {
                self.cache
                    .remove_key(cache_key(PLAYER_PREFIX, &uuid.to_string()));
                None
            }
        }
    }

    pub fn get_player(&self, uuid: &Uuid) -> Option<Arc<CloudPlayer>> {
        self.by_uuid.get(uuid).map(|p| p.value().clone())
    }

    pub fn get_player_by_name(&self, name: &str) -> Option<Arc<CloudPlayer>> {
        let uuid = *self.by_name.get(&name.to_lowercase())?;
        self.get_player(&uuid)
    }

    pub fn players(&self) -> Vec<Arc<CloudPlayer>> {
        self.by_uuid.iter().map(|p| p.value().clone()).collect()
    }

    pub fn player_count(&self) -> usize {
        self.by_uuid.len()
    }
}
