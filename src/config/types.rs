use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 應用程序配置結構
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    /// 原樣傳遞給工作進程的橋接配置 (BRIDGE_CFG)
    #[serde(default = "default_bridge")]
    pub bridge: serde_json::Value,
}

fn default_bridge() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            redis: RedisConfig::default(),
            broker: BrokerConfig::default(),
            cloud: CloudConfig::default(),
            bridge: default_bridge(),
        }
    }
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.log.validate()?;
        self.redis.validate()?;
        self.broker.validate()?;
        self.cloud.validate()?;

        if !self.bridge.is_object() {
            return Err(ValidationError::InvalidValue(
                "bridge 必須是 JSON 物件".to_string(),
            ));
        }

        Ok(())
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    /// 滾動日誌檔名前綴，留空則只輸出到終端
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證日誌級別
        ValidationUtils::one_of(
            &self.level.to_lowercase().as_str(),
            &["trace", "debug", "info", "warn", "error"],
            "log.level",
        )?;

        // 驗證日誌格式
        ValidationUtils::one_of(
            &self.format.to_lowercase().as_str(),
            &["pretty", "json"],
            "log.format",
        )?;

        if let Some(file) = &self.file {
            ValidationUtils::not_empty(file, "log.file")?;
        }

        Ok(())
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            pool_size: 16,
            connection_timeout_secs: 5,
            reconnect_delay_secs: 1,
        }
    }
}

impl RedisConfig {
    /// 組合連接 URL
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// 連接超時持續時間
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// 訂閱斷線後的重連間隔
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Validator for RedisConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證Redis配置
        ValidationUtils::not_empty(&self.host, "redis.host")?;
        ValidationUtils::in_range(self.port, 1, 65535, "redis.port")?;
        ValidationUtils::in_range(self.db, 0, 15, "redis.db")?;
        ValidationUtils::in_range(self.pool_size, 1, 100, "redis.pool_size")?;
        ValidationUtils::in_range(
            self.connection_timeout_secs,
            1,
            60,
            "redis.connection_timeout_secs",
        )?;
        ValidationUtils::in_range(self.reconnect_delay_secs, 0, 60, "redis.reconnect_delay_secs")?;

        Ok(())
    }
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 調度器自身訂閱的頻道
    pub main_route: String,
    /// 同時進行中的發布數量上限
    pub publish_workers: usize,
    /// 請求等待回應的預設超時（毫秒）
    pub response_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            main_route: "cloud".to_string(),
            publish_workers: 8,
            response_timeout_ms: 5000,
        }
    }
}

impl BrokerConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Validator for BrokerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.main_route, "broker.main_route")?;
        ValidationUtils::in_range(self.publish_workers, 8, 256, "broker.publish_workers")?;
        ValidationUtils::in_range(
            self.response_timeout_ms,
            100,
            60_000,
            "broker.response_timeout_ms",
        )?;

        Ok(())
    }
}

/// 雲端調度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// 所有工作目錄的根目錄
    pub base_dir: PathBuf,
    /// 模板檢查間隔（毫秒）
    pub check_interval_ms: u64,
    /// 伺服器註冊後延遲啟動進程的時間（毫秒）
    pub start_delay_ms: u64,
    /// stop_all 等待上限（秒）
    pub stop_all_timeout_secs: u64,
    /// 空伺服器閒置多久後回收（秒）
    pub idle_timeout_secs: u64,
    pub port_min: u16,
    pub port_max: u16,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            check_interval_ms: 3000,
            start_delay_ms: 1000,
            stop_all_timeout_secs: 60,
            idle_timeout_secs: 300,
            port_min: 10000,
            port_max: 50000,
        }
    }
}

impl CloudConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn stop_all_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_all_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Validator for CloudConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.base_dir.to_string_lossy(), "cloud.base_dir")?;
        ValidationUtils::in_range(self.check_interval_ms, 100, 600_000, "cloud.check_interval_ms")?;
        ValidationUtils::in_range(self.stop_all_timeout_secs, 1, 3600, "cloud.stop_all_timeout_secs")?;
        ValidationUtils::in_range(self.port_min, 1024, 65535, "cloud.port_min")?;
        ValidationUtils::in_range(self.port_max, self.port_min, 65535, "cloud.port_max")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.cloud.check_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig {
            host: "10.0.0.2".to_string(),
            port: 6380,
            db: 3,
            ..RedisConfig::default()
        };
        assert_eq!(redis.url(), "redis://10.0.0.2:6380/3");
    }

    #[test]
    fn test_publish_workers_lower_bound() {
        let broker = BrokerConfig {
            publish_workers: 4,
            ..BrokerConfig::default()
        };
        assert!(broker.validate().is_err());
    }

    #[test]
    fn test_port_range_must_be_ordered() {
        let cloud = CloudConfig {
            port_min: 20000,
            port_max: 10000,
            ..CloudConfig::default()
        };
        assert!(cloud.validate().is_err());
    }

    #[test]
    fn test_bridge_must_be_object() {
        let config = ApplicationConfig {
            bridge: serde_json::json!([1, 2]),
            ..ApplicationConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
