//! 伺服器管理器
//!
//! 持有類型、模板與實例的註冊表，負責實例命名、端口分配、建立流程、
//! 最佳實例查詢與全體關閉。

use crate::event::{CloudEvent, ServerCreateEvent};
use crate::server::catalog::Catalog;
use crate::server::context::ServerContext;
use crate::server::error::ServerResult;
use crate::server::instance::Server;
use crate::server::status::ServerStatus;
use crate::server::template::{ServerType, Template};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 最佳實例查詢結果
#[derive(Debug, Clone)]
pub struct BestServerResult {
    pub server: Arc<Server>,
    pub free_slots: usize,
}

pub struct ServerManager {
    ctx: Arc<ServerContext>,
    types: DashMap<String, Arc<ServerType>>,
    templates: DashMap<String, Arc<Template>>,
    /// 鍵為大寫名稱
    servers: DashMap<String, Arc<Server>>,
    /// 已分配但尚未註冊的名稱（大寫）
    reserved: Mutex<HashSet<String>>,
}

impl ServerManager {
    pub fn new(ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            types: DashMap::new(),
            templates: DashMap::new(),
            servers: DashMap::new(),
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn load_catalog(&self, catalog: Catalog) {
        for (name, server_type) in catalog.types {
            self.types.insert(name, server_type);
        }
        for (name, template) in catalog.templates {
            self.templates.insert(name, template);
        }
        info!(
            types = self.types.len(),
            templates = self.templates.len(),
            "已註冊伺服器目錄"
        );
    }

    pub fn register_type(&self, server_type: Arc<ServerType>) {
        self.types.insert(server_type.name.clone(), server_type);
    }

    pub fn register_template(&self, template: Arc<Template>) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get_type(&self, name: &str) -> Option<Arc<ServerType>> {
        self.types.get(name).map(|t| t.value().clone())
    }

    pub fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).map(|t| t.value().clone())
    }

    pub fn templates(&self) -> Vec<Arc<Template>> {
        self.templates.iter().map(|t| t.value().clone()).collect()
    }

    /// 名稱不分大小寫
    pub fn get_server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers
            .get(&name.to_uppercase())
            .map(|s| s.value().clone())
    }

    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.iter().map(|s| s.value().clone()).collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn proxy_servers(&self) -> Vec<Arc<Server>> {
        self.servers
            .iter()
            .filter(|s| s.is_proxy())
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn get_servers_by_template(&self, template: &Template) -> Vec<Arc<Server>> {
        self.servers
            .iter()
            .filter(|s| s.template().name() == template.name())
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn get_servers_by_type(&self, server_type: &ServerType) -> Vec<Arc<Server>> {
        self.servers
            .iter()
            .filter(|s| s.server_type().name == server_type.name)
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn get_running_server_count(&self, template: &Template) -> usize {
        self.servers
            .iter()
            .filter(|s| {
                s.template().name() == template.name() && s.status() == ServerStatus::Running
            })
            .count()
    }

    /// 運行中實例的剩餘位置總和
    pub fn get_template_free_slots(&self, template: &Template) -> usize {
        self.get_best_server(template)
            .iter()
            .map(|r| r.free_slots)
            .sum()
    }

    /// 有空位的運行中實例，依剩餘位置由少到多排序
    ///
    /// 優先填滿已有玩家的實例，讓空實例可以被閒置回收。
    pub fn get_best_server(&self, template: &Template) -> Vec<BestServerResult> {
        let mut results: Vec<BestServerResult> = self
            .get_servers_by_template(template)
            .into_iter()
            .filter(|s| s.status() == ServerStatus::Running)
            .filter_map(|server| {
                let free_slots = template.max_players().saturating_sub(server.player_count());
                (free_slots > 0).then_some(BestServerResult { server, free_slots })
            })
            .collect();
        results.sort_by_key(|r| r.free_slots);
        results
    }

    pub fn idle_timeout(&self) -> Duration {
        self.ctx.settings.idle_timeout()
    }

    pub(crate) fn remove(&self, server: &Arc<Server>) {
        let key = server.name().to_uppercase();
        let removed = self
            .servers
            .remove_if(&key, |_, existing| Arc::ptr_eq(existing, server));
        if removed.is_some() {
            debug!(server = %server.name(), "已註銷伺服器");
        }
    }

    /// 分配實例名稱
    ///
    /// 指定的編號已被使用時退回自動搜尋。
    fn allocate_name(&self, template: &Template, requested: Option<u32>) -> String {
        let mut reserved = self.reserved.lock();
        let taken = |name: &str, reserved: &HashSet<String>| {
            let key = name.to_uppercase();
            self.servers.contains_key(&key) || reserved.contains(&key)
        };

        if let Some(id) = requested {
            let name = template.instance_name(id);
            if !taken(&name, &*reserved) {
                reserved.insert(name.to_uppercase());
                return name;
            }
            debug!(server = %name, "指定的實例名稱已被使用，改為自動分配");
        }

        let mut id = 1u32;
        loop {
            let name = template.instance_name(id);
            if !taken(&name, &*reserved) {
                reserved.insert(name.to_uppercase());
                return name;
            }
            id += 1;
        }
    }

    fn release_name(&self, name: &str) {
        self.reserved.lock().remove(&name.to_uppercase());
    }

    fn pick_port(&self) -> u16 {
        let min = self.ctx.settings.port_min;
        let max = self.ctx.settings.port_max.max(min);
        rand::rng().random_range(min..=max)
    }

    /// 建立並排程啟動一個實例
    ///
    /// 建立事件被取消時返回 `Ok(None)`。
    pub async fn start_server(
        self: &Arc<Self>,
        template: &Arc<Template>,
        id: Option<u32>,
    ) -> ServerResult<Option<Arc<Server>>> {
        let port = self.pick_port();
        let name = self.allocate_name(template, id);

        let server = Arc::new(Server::new(
            self.ctx.clone(),
            Arc::downgrade(self),
            template.clone(),
            name.clone(),
            port,
        ));

        let event = self
            .ctx
            .events
            .call(CloudEvent::ServerCreate(ServerCreateEvent::new(server.clone())));
        if event.is_cancelled() {
            info!(server = %name, "伺服器建立已被取消");
            self.release_name(&name);
            return Ok(None);
        }

        if let Err(e) = server.prepare().await {
            error!(server = %name, "準備伺服器失敗: {}", e);
            server.abandon();
            self.release_name(&name);
            if !template.is_static() {
                if let Err(e) = tokio::fs::remove_dir_all(server.directory()).await {
                    debug!(server = %name, "清理實例目錄失敗: {}", e);
                }
            }
            return Err(e);
        }

        self.servers.insert(name.to_uppercase(), server.clone());
        self.release_name(&name);
        template.increment_running();
        server.sync_cache();
        info!(server = %name, template = %template.name(), port, "伺服器已建立");

        let starting = server.clone();
        let events = self.ctx.events.clone();
        let handle = self
            .ctx
            .scheduler
            .schedule_once(self.ctx.settings.start_delay(), async move {
                let result = starting.start().await;
                match result {
                    Ok(true) => {
                        events.call(CloudEvent::ServerStart { server: starting });
                    }
                    Ok(false) => {}
                    Err(e) => error!(server = %starting.name(), "啟動伺服器失敗: {}", e),
                }
            });
        server.track_timer(handle);

        Ok(Some(server))
    }

    /// 關閉所有實例並等待退出，超過時限返回 false
    pub async fn stop_all(&self) -> bool {
        let servers = self.servers();
        if servers.is_empty() {
            return true;
        }

        info!(count = servers.len(), "正在關閉所有伺服器");
        let timeout = self.ctx.settings.stop_all_timeout();

        let shutdown = join_all(servers.iter().map(|server| async move {
            server.kill(false).await;
            server.wait_exited().await;
        }));

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(_) => {
                info!("所有伺服器已關閉");
                true
            }
            Err(_) => {
                let remaining: Vec<String> = servers
                    .iter()
                    .filter(|s| !s.has_exited())
                    .map(|s| s.name().to_string())
                    .collect();
                warn!(?remaining, "部分伺服器未在時限內關閉");
                false
            }
        }
    }

    /// 對所有模板執行一次自動擴縮評估
    pub async fn check_templates(self: &Arc<Self>) {
        for template in self.templates() {
            template.check_servers(self).await;
        }
    }
}
