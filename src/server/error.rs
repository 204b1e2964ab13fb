use thiserror::Error;

/// 伺服器錯誤類型
#[derive(Error, Debug)]
pub enum ServerError {
    /// 配置錯誤
    #[error("配置錯誤: {0}")]
    Config(String),

    /// IO 錯誤
    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    /// 實例目錄準備失敗
    #[error("伺服器 {server} 準備失敗: {reason}")]
    Preparation { server: String, reason: String },

    /// 進程啟動失敗
    #[error("伺服器 {server} 進程啟動失敗: {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// 阻塞任務執行失敗
    #[error("背景任務失敗: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 伺服器結果類型別名
pub type ServerResult<T> = Result<T, ServerError>;
