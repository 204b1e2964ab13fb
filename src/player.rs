// player.rs - 玩家追蹤模組
//
// 玩家由代理回報上線，調度器記錄其所在的代理（網路）與後端伺服器，
// 並可透過代理對玩家發送訊息、轉移或踢出。

/// 玩家模型
pub mod cloud_player;
/// 玩家註冊表
pub mod manager;

pub use cloud_player::{CloudPlayer, PlayerData};
pub use manager::PlayerManager;
