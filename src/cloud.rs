//! 調度器根物件
//!
//! 持有所有子系統的唯一實例，並在建構時把依賴逐一傳入各元件。

use crate::cache::{CacheStore, CloudCache, RedisCacheStore};
use crate::config::types::ApplicationConfig;
use crate::event::EventManager;
use crate::handler::PacketHandler;
use crate::messaging::{Broker, Transport, TransportError};
use crate::player::PlayerManager;
use crate::redis::RedisTransport;
use crate::scheduler::TaskScheduler;
use crate::server::{Catalog, ProcessEnv, ServerContext, ServerError, ServerManager};
use crate::utils::Directories;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("傳輸層錯誤: {0}")]
    Transport(#[from] TransportError),

    #[error("伺服器錯誤: {0}")]
    Server(#[from] ServerError),

    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),
}

pub type CloudResult<T> = Result<T, CloudError>;

pub struct Cloud {
    config: ApplicationConfig,
    directories: Directories,
    broker: Arc<Broker>,
    scheduler: Arc<TaskScheduler>,
    events: Arc<EventManager>,
    cache: CloudCache,
    servers: Arc<ServerManager>,
    players: Arc<PlayerManager>,
    handler: Arc<PacketHandler>,
    booted: AtomicBool,
    stopped: AtomicBool,
}

impl Cloud {
    /// 以指定的傳輸層與快取後端組裝，必須在 tokio 執行環境內呼叫
    pub fn new(
        config: ApplicationConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
    ) -> Arc<Self> {
        let directories = Directories::new(&config.cloud.base_dir);
        let broker = Arc::new(Broker::new(
            &config.broker,
            transport,
            &[],
            config.redis.reconnect_delay(),
        ));
        let scheduler = Arc::new(TaskScheduler::new());
        let events = Arc::new(EventManager::new());
        let cache = CloudCache::new(store);

        let ctx = Arc::new(ServerContext {
            broker: broker.clone(),
            scheduler: scheduler.clone(),
            events: events.clone(),
            cache: cache.clone(),
            directories: directories.clone(),
            env: ProcessEnv::from_config(&config),
            settings: config.cloud.clone(),
        });
        let servers = ServerManager::new(ctx);
        let players = Arc::new(PlayerManager::new(cache.clone()));
        let handler = PacketHandler::new(
            servers.clone(),
            players.clone(),
            events.clone(),
            broker.clone(),
        );

        Arc::new(Self {
            config,
            directories,
            broker,
            scheduler,
            events,
            cache,
            servers,
            players,
            handler,
            booted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// 以 Redis 作為傳輸層與快取後端
    pub fn connect(config: ApplicationConfig) -> CloudResult<Arc<Self>> {
        let transport = RedisTransport::new(config.redis.clone())?;
        let store = Arc::new(RedisCacheStore::new(transport.pool()));
        Ok(Self::new(config, Arc::new(transport), store))
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn cache(&self) -> &CloudCache {
        &self.cache
    }

    pub fn servers(&self) -> &Arc<ServerManager> {
        &self.servers
    }

    pub fn players(&self) -> &Arc<PlayerManager> {
        &self.players
    }

    /// 建立目錄、載入目錄檔、掛載封包處理並開始定期檢查模板
    pub async fn boot(self: &Arc<Self>) -> CloudResult<()> {
        if self.booted.swap(true, Ordering::AcqRel) {
            warn!("調度器已啟動");
            return Ok(());
        }

        info!(base_dir = %self.directories.base().display(), "正在啟動調度器");
        self.directories.create_all()?;

        let types_dir = self.directories.types_dir();
        let templates_dir = self.directories.template_configs_dir();
        let catalog =
            tokio::task::spawn_blocking(move || Catalog::load(&types_dir, &templates_dir))
                .await
                .map_err(ServerError::from)?;
        self.servers.load_catalog(catalog);

        self.handler.attach();
        self.broker.start();

        let servers = self.servers.clone();
        self.scheduler
            .schedule_repeating(self.config.cloud.check_interval(), move || {
                let servers = servers.clone();
                async move { servers.check_templates().await }
            });

        info!(route = %self.broker.main_route(), "調度器已啟動");
        Ok(())
    }

    /// 關閉所有伺服器與消息代理，重複呼叫無效果
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("正在關閉調度器");
        self.scheduler.cancel_all();

        if !self.servers.stop_all().await {
            warn!("部分伺服器未能在時限內關閉");
        }

        self.scheduler.stop();
        self.broker.shutdown().await;
        self.handler.detach();
        self.cache.flush().await;
        info!("調度器已關閉");
    }
}
