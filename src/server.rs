// server.rs - 伺服器實例管理，宣告子模組
//
// 伺服器模組負責工作進程的完整生命週期：
// 從模板準備實例目錄、啟動與監看進程、依模板設定自動擴縮，到退出後的清理。

/// 類型與模板描述檔載入
pub mod catalog;
/// 實例共用的服務
pub mod context;
/// 伺服器級別錯誤處理
pub mod error;
/// 單一實例與其進程
pub mod instance;
/// 實例註冊表與建立流程
pub mod manager;
/// 進程輸出讀取
pub mod reader;
/// 實例狀態
pub mod status;
/// 伺服器類型與模板
pub mod template;

pub use catalog::{Catalog, TemplateDescriptor};
pub use context::{ProcessEnv, ServerContext};
pub use error::{ServerError, ServerResult};
pub use instance::{Server, ServerData};
pub use manager::{BestServerResult, ServerManager};
pub use status::ServerStatus;
pub use template::{ServerType, Template, TemplateSettings};
