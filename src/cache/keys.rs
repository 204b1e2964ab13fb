/// 伺服器快取鍵前綴，後接大寫伺服器名稱
pub const SERVER_PREFIX: &str = "server:";

/// 玩家快取鍵前綴，後接玩家 UUID
pub const PLAYER_PREFIX: &str = "player:";

/// 組合快取鍵
pub fn cache_key(prefix: &str, id: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + id.len());
    key.push_str(prefix);
    key.push_str(id);
    key
}
