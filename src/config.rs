/// 配置管理模組
///
/// 本模組負責加載、驗證和管理雲端調度器的配置。
/// 支持從開發和生產兩種環境中加載不同的配置，並允許環境變數覆蓋。
// 宣告子模組
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

// 重新導出常用組件
pub use loader::{ConfigExt, ConfigLoader, Environment};
pub use manager::{init_config, ConfigLoadError};
pub use types::*;
pub use validation::{validate_config, ValidationError, ValidationUtils, Validator};

#[cfg(test)]
mod tests {
    #[test]
    fn test_module_exports() {
        // 確保重要的導出可用
        let _ = super::Environment::Development;
        let _ = super::ValidationUtils::not_empty("test", "field");

        // 類型檢查
        fn _ensure_config_works(cfg: &super::ApplicationConfig) {
            let _ = &cfg.log;
            let _ = &cfg.redis;
            let _ = &cfg.broker;
            let _ = &cfg.cloud;
            let _ = &cfg.bridge;
        }
    }
}
