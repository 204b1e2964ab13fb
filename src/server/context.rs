use crate::cache::CloudCache;
use crate::config::types::{ApplicationConfig, CloudConfig};
use crate::event::EventManager;
use crate::messaging::Broker;
use crate::scheduler::TaskScheduler;
use crate::utils::Directories;
use std::sync::Arc;

/// 注入工作進程的環境變數
#[derive(Debug, Clone)]
pub struct ProcessEnv {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    /// 原樣傳遞的橋接配置（JSON 字串）
    pub bridge: String,
}

impl ProcessEnv {
    pub const REDIS_IP: &'static str = "REDIS_IP";
    pub const REDIS_PORT: &'static str = "REDIS_PORT";
    pub const REDIS_DB: &'static str = "REDIS_DB";
    pub const BRIDGE_CFG: &'static str = "BRIDGE_CFG";

    pub fn from_config(config: &ApplicationConfig) -> Self {
        Self {
            redis_host: config.redis.host.clone(),
            redis_port: config.redis.port,
            redis_db: config.redis.db,
            bridge: config.bridge.to_string(),
        }
    }

    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (Self::REDIS_IP, self.redis_host.clone()),
            (Self::REDIS_PORT, self.redis_port.to_string()),
            (Self::REDIS_DB, self.redis_db.to_string()),
            (Self::BRIDGE_CFG, self.bridge.clone()),
        ]
    }
}

/// 伺服器實例共用的服務
pub struct ServerContext {
    pub broker: Arc<Broker>,
    pub scheduler: Arc<TaskScheduler>,
    pub events: Arc<EventManager>,
    pub cache: CloudCache,
    pub directories: Directories,
    pub env: ProcessEnv,
    pub settings: CloudConfig,
}
