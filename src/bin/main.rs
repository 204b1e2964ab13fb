use anyhow::{anyhow, Result};
use clap::Parser;
use cloud_server::config::{ApplicationConfig, ConfigLoader, Environment, LogConfig};
use cloud_server::utils::Directories;
use cloud_server::Cloud;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// 遊戲伺服器集群調度器
#[derive(Debug, Parser)]
#[command(name = "cloud_server", version, about)]
struct Args {
    /// 配置目錄（預設為 CONFIG_DIR 或 ./config）
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// 執行環境：development 或 production（預設為 CLOUD_ENV）
    #[arg(long)]
    env: Option<String>,

    /// 覆蓋配置中的工作根目錄
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化配置
    let env = args
        .env
        .as_deref()
        .map(Environment::parse)
        .unwrap_or_else(Environment::from_env);
    let config_dir = args.config_dir.unwrap_or_else(ConfigLoader::default_dir);
    let mut app_config = ApplicationConfig::load_from(&config_dir, env)
        .map_err(|e| anyhow!("載入配置失敗: {}", e))?;
    if let Some(base_dir) = args.base_dir {
        app_config.cloud.base_dir = base_dir;
    }

    // 初始化日誌系統
    let directories = Directories::new(&app_config.cloud.base_dir);
    let _guard = init_logging(&app_config.log, &directories)?;
    info!(env = ?env, config_dir = %config_dir.display(), "配置已載入");

    let cloud = Cloud::connect(app_config)?;
    if let Err(e) = cloud.boot().await {
        error!("調度器啟動失敗: {}", e);
        cloud.stop().await;
        return Err(e.into());
    }

    // 等待終止信號
    match signal::ctrl_c().await {
        Ok(()) => info!("收到終止信號，開始關閉"),
        Err(e) => error!("無法監聽終止信號: {}", e),
    }

    cloud.stop().await;
    Ok(())
}

fn init_logging(log_config: &LogConfig, directories: &Directories) -> Result<Option<WorkerGuard>> {
    // RUST_LOG 優先，否則使用配置的級別
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_config.level.to_lowercase()));
    let json = log_config.format.eq_ignore_ascii_case("json");

    let (writer, guard) = match &log_config.file {
        Some(file) => {
            let appender = tracing_appender::rolling::daily(directories.logs_dir(), file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (writer, json) {
        (Some(writer), true) => builder.json().with_writer(writer).try_init(),
        (Some(writer), false) => builder.with_ansi(false).with_writer(writer).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    result.map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    info!("日誌系統初始化完成");
    Ok(guard)
}
