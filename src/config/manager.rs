use crate::config::loader::{ConfigLoader, Environment};
use crate::config::types::ApplicationConfig;
use crate::config::validation::{ValidationError, Validator};
use config::ConfigError;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// 配置載入錯誤
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("配置來源錯誤: {0}")]
    Source(#[from] ConfigError),

    #[error("配置驗證失敗: {0}")]
    Validation(#[from] ValidationError),
}

/// 初始化配置（在應用程序啟動時調用）
///
/// 配置由調用者持有並向下傳遞，不存放在全局狀態中。
pub fn init_config() -> Result<ApplicationConfig, ConfigLoadError> {
    ApplicationConfig::load_from_env()
}

/// ApplicationConfig 加載方法實現
impl ApplicationConfig {
    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigLoadError> {
        let env = Environment::from_env();
        debug!("從環境加載配置: {:?}", env);
        Self::load_from(&ConfigLoader::default_dir(), env)
    }

    /// 從指定目錄與環境加載配置並驗證
    pub fn load_from(config_dir: &Path, env: Environment) -> Result<Self, ConfigLoadError> {
        let config_source = ConfigLoader::load_from(config_dir, env)?;

        // 使用 serde 反序列化配置
        let app_config: ApplicationConfig = config_source.try_deserialize()?;

        app_config.validate()?;
        debug!("配置驗證通過");

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_load_with_file_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("production.toml"),
            r#"
[redis]
host = "redis.internal"
port = 6390

[cloud]
check_interval_ms = 5000

[bridge]
motd = "hello"
"#,
        )
        .unwrap();

        env::set_var("CLOUD__REDIS__DB", "2");
        let config = ApplicationConfig::load_from(dir.path(), Environment::Production)
            .expect("無法加載測試配置");
        env::remove_var("CLOUD__REDIS__DB");

        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.redis.port, 6390);
        assert_eq!(config.redis.db, 2);
        assert_eq!(config.cloud.check_interval_ms, 5000);
        // 未指定的欄位保留預設值
        assert_eq!(config.broker.main_route, "cloud");
        assert_eq!(config.bridge["motd"], "hello");
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApplicationConfig::load_from(dir.path(), Environment::Development).unwrap();
        assert_eq!(config.cloud.port_min, 10000);
        assert_eq!(config.broker.publish_workers, 8);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("development.toml"),
            "[log]\nlevel = \"verbose\"\n",
        )
        .unwrap();

        let result = ApplicationConfig::load_from(dir.path(), Environment::Development);
        assert_matches!(result, Err(ConfigLoadError::Validation(_)));
    }
}
