//! 伺服器實例與其工作進程
//!
//! 狀態轉移以 CAS 完成，確保同一個轉移只有一個呼叫者成功。進程退出後的
//! 清理（通知代理、歸檔日誌、刪除目錄、註銷）保證只執行一次。

use crate::cache::{Cacheable, SERVER_PREFIX};
use crate::event::CloudEvent;
use crate::messaging::{Packet, PacketBody};
use crate::scheduler::TaskHandle;
use crate::server::context::ServerContext;
use crate::server::error::{ServerError, ServerResult};
use crate::server::manager::ServerManager;
use crate::server::reader::{ConsoleBuffer, OutputReader};
use crate::server::status::{AtomicStatus, ServerStatus};
use crate::server::template::{ServerType, Template};
use crate::utils::{copy_dir_recursive, current_timestamp_ms, replace_in_file};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 執行中的工作進程
struct ProcessHandle {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: mpsc::Sender<()>,
    alive: AtomicBool,
}

impl ProcessHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn kill(&self) {
        let _ = self.kill_tx.try_send(());
    }
}

/// 一個由模板產生的伺服器實例
pub struct Server {
    name: String,
    uuid: Uuid,
    port: u16,
    created_at: i64,
    template: Arc<Template>,
    server_type: Arc<ServerType>,
    directory: PathBuf,
    status: AtomicStatus,
    players: RwLock<Vec<Uuid>>,
    last_player_update: AtomicI64,
    extra_data: RwLock<Value>,
    process: RwLock<Option<Arc<ProcessHandle>>>,
    reader: Mutex<Option<Arc<OutputReader>>>,
    timers: Mutex<Vec<TaskHandle>>,
    exited: AtomicBool,
    cached: RwLock<bool>,
    exit_signal: watch::Sender<bool>,
    manager: Weak<ServerManager>,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub(crate) fn new(
        ctx: Arc<ServerContext>,
        manager: Weak<ServerManager>,
        template: Arc<Template>,
        name: String,
        port: u16,
    ) -> Self {
        let directory = if template.is_static() {
            ctx.directories.servers_dir().join(&name)
        } else {
            ctx.directories.temp_dir().join(&name)
        };
        let now = current_timestamp_ms();
        let (exit_signal, _) = watch::channel(false);

        Self {
            name,
            uuid: Uuid::new_v4(),
            port,
            created_at: now,
            server_type: template.server_type().clone(),
            template,
            directory,
            status: AtomicStatus::new(ServerStatus::None),
            players: RwLock::new(Vec::new()),
            last_player_update: AtomicI64::new(now),
            extra_data: RwLock::new(Value::Object(Default::default())),
            process: RwLock::new(None),
            reader: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            cached: RwLock::new(true),
            exit_signal,
            manager,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn server_type(&self) -> &Arc<ServerType> {
        &self.server_type
    }

    pub fn is_proxy(&self) -> bool {
        self.server_type.is_proxy
    }

    pub fn is_static(&self) -> bool {
        self.template.is_static()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn status(&self) -> ServerStatus {
        self.status.load()
    }

    /// 直接設定狀態，狀態有變時同步快取
    pub fn set_status(&self, status: ServerStatus) {
        let previous = self.status.swap(status);
        if previous != status {
            debug!(server = %self.name, from = %previous, to = %status, "狀態變更");
            self.sync_cache();
        }
    }

    /// 僅在當前狀態為 `from` 時轉移到 `to`
    pub fn transition(&self, from: ServerStatus, to: ServerStatus) -> bool {
        if self.status.compare_exchange(from, to) {
            debug!(server = %self.name, from = %from, to = %to, "狀態轉移");
            self.sync_cache();
            true
        } else {
            false
        }
    }

    pub fn players(&self) -> Vec<Uuid> {
        self.players.read().clone()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    pub fn has_player(&self, uuid: &Uuid) -> bool {
        self.players.read().contains(uuid)
    }

    pub fn add_player(&self, uuid: Uuid) -> bool {
        let added = {
            let mut players = self.players.write();
            if players.contains(&uuid) {
                false
            } else {
                players.push(uuid);
                true
            }
        };
        self.touch_players();
        added
    }

    pub fn remove_player(&self, uuid: &Uuid) -> bool {
        let removed = {
            let mut players = self.players.write();
            let before = players.len();
            players.retain(|p| p != uuid);
            players.len() != before
        };
        self.touch_players();
        removed
    }

    /// 寫入快取；退出清理刪除快取鍵之後不再寫入
    pub(crate) fn sync_cache(&self) {
        let cached = self.cached.read();
        if *cached {
            self.ctx.cache.update(self);
        }
    }

    /// 未能進入註冊表的實例直接標記為已停止並視為已退出，不寫入快取
    pub(crate) fn abandon(&self) {
        *self.cached.write() = false;
        self.status.swap(ServerStatus::Stopped);
        if !self.exited.swap(true, Ordering::AcqRel) {
            self.exit_signal.send_replace(true);
        }
    }

    fn touch_players(&self) {
        self.last_player_update
            .store(current_timestamp_ms(), Ordering::Release);
        self.sync_cache();
    }

    /// 最後一次玩家進出的時間（毫秒）
    pub fn last_player_update(&self) -> i64 {
        self.last_player_update.load(Ordering::Acquire)
    }

    pub fn set_last_player_update(&self, timestamp_ms: i64) {
        self.last_player_update.store(timestamp_ms, Ordering::Release);
    }

    pub fn extra_data(&self) -> Value {
        self.extra_data.read().clone()
    }

    pub fn set_extra_data(&self, data: Value) {
        *self.extra_data.write() = data;
        self.sync_cache();
    }

    pub fn pid(&self) -> Option<u32> {
        let process = self.process.read().clone();
        process.and_then(|p| p.pid)
    }

    pub fn is_process_alive(&self) -> bool {
        let process = self.process.read().clone();
        process.is_some_and(|p| p.is_alive())
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// 等待退出清理完成
    pub async fn wait_exited(&self) {
        let mut rx = self.exit_signal.subscribe();
        let _ = rx.wait_for(|exited| *exited).await;
    }

    pub(crate) fn track_timer(&self, handle: TaskHandle) {
        let mut timers = self.timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.push(handle);
    }

    fn cancel_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in timers {
            timer.cancel();
        }
    }

    /// 建立實例目錄並從模板複製檔案，已準備過的實例直接返回
    pub async fn prepare(&self) -> ServerResult<()> {
        if self.status() >= ServerStatus::Prepared {
            debug!(server = %self.name, "實例已準備，略過");
            return Ok(());
        }

        info!(server = %self.name, directory = %self.directory.display(), "正在準備伺服器");

        let template_dir = self
            .ctx
            .directories
            .templates_dir()
            .join(self.template.name());
        let directory = self.directory.clone();
        let port_file = directory.join(&self.server_type.port_setting_file);
        let placeholder = self.server_type.port_setting_placeholder.clone();
        let port = self.port;
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || -> ServerResult<()> {
            if !template_dir.is_dir() {
                return Err(ServerError::Preparation {
                    server: name,
                    reason: format!("模板目錄不存在: {}", template_dir.display()),
                });
            }

            std::fs::create_dir_all(&directory)?;
            copy_dir_recursive(&template_dir, &directory)?;

            if port_file.is_file() {
                replace_in_file(&port_file, &placeholder, &port.to_string())?;
            } else {
                warn!(server = %name, file = %port_file.display(), "找不到端口設定檔");
            }
            Ok(())
        })
        .await??;

        self.set_status(ServerStatus::Prepared);
        Ok(())
    }

    /// 啟動工作進程，只有 PREPARED 的實例會啟動
    pub async fn start(self: &Arc<Self>) -> ServerResult<bool> {
        if !self.transition(ServerStatus::Prepared, ServerStatus::Starting) {
            warn!(server = %self.name, status = %self.status(), "無法在目前狀態啟動伺服器");
            return Ok(false);
        }

        info!(server = %self.name, port = self.port, "正在啟動伺服器");

        if let Err(e) = self.launch().await {
            error!(server = %self.name, "伺服器啟動失敗: {}", e);
            self.set_status(ServerStatus::Stopped);
            self.spawn_exit();
            return Err(e);
        }

        self.schedule_startup_guard();
        Ok(true)
    }

    async fn launch(self: &Arc<Self>) -> ServerResult<()> {
        let (program, args) = self.server_type.start_command.split_first().ok_or_else(|| {
            ServerError::Config(format!("伺服器類型 {} 沒有啟動命令", self.server_type.name))
        })?;

        let buffer = ConsoleBuffer::create(&self.name, &self.directory).await?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.directory)
            .envs(self.ctx.env.vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ServerError::Spawn {
            server: self.name.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            let reader = OutputReader::start(buffer, stdout, stderr, &self.ctx.scheduler);
            *self.reader.lock() = Some(Arc::new(reader));
        }

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let handle = Arc::new(ProcessHandle {
            pid: child.id(),
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx,
            alive: AtomicBool::new(true),
        });
        *self.process.write() = Some(handle.clone());

        debug!(server = %self.name, pid = ?handle.pid, "進程已啟動");
        tokio::spawn(watch_process(self.clone(), child, kill_rx, handle));
        Ok(())
    }

    fn schedule_startup_guard(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = self
            .ctx
            .scheduler
            .schedule_once(self.template.max_boot_time(), async move {
                let Some(server) = weak.upgrade() else {
                    return;
                };
                if server.status() <= ServerStatus::Starting {
                    error!(server = %server.name, "伺服器啟動逾時，強制關閉");
                    server.kill(true).await;
                }
            });
        self.track_timer(handle);
    }

    /// 要求運行中的伺服器正常關閉
    pub async fn stop(&self) {
        if !self.transition(ServerStatus::Running, ServerStatus::Stopping) {
            warn!(server = %self.name, status = %self.status(), "只能停止運行中的伺服器");
            return;
        }

        info!(server = %self.name, "正在停止伺服器");
        self.write_console(&self.server_type.stop_command).await;
    }

    /// 先嘗試正常關閉，`shutdown_time` 後進程仍在則強制終止
    ///
    /// 尚未啟動的實例直接回收。
    pub async fn kill(self: &Arc<Self>, silent: bool) {
        if self.transition(ServerStatus::Prepared, ServerStatus::Stopped) {
            info!(server = %self.name, "伺服器尚未啟動，直接回收");
            self.cancel_timers();
            self.spawn_exit();
            return;
        }

        self.stop().await;

        let weak = Arc::downgrade(self);
        let handle = self
            .ctx
            .scheduler
            .schedule_once(self.template.shutdown_time(), async move {
                let Some(server) = weak.upgrade() else {
                    return;
                };
                if server.is_process_alive() {
                    if !silent {
                        warn!(server = %server.name, "伺服器未在時限內關閉，強制終止");
                    }
                    server.force_kill();
                }
            });
        self.track_timer(handle);
    }

    fn force_kill(&self) {
        let process = self.process.read().clone();
        if let Some(process) = process {
            process.kill();
        }
    }

    /// 寫入一行控制台命令
    pub async fn write_console(&self, command: &str) {
        let status = self.status();
        if !matches!(
            status,
            ServerStatus::Starting | ServerStatus::Running | ServerStatus::Stopping
        ) {
            warn!(server = %self.name, status = %status, "目前狀態不接受控制台命令");
            return;
        }

        let process = self.process.read().clone();
        let Some(process) = process.filter(|p| p.is_alive()) else {
            warn!(server = %self.name, "進程未運行，無法寫入命令");
            return;
        };

        let mut stdin = process.stdin.lock().await;
        match stdin.as_mut() {
            Some(stdin) => {
                if let Err(e) = write_command(stdin, command).await {
                    error!(server = %self.name, "寫入控制台命令失敗: {}", e);
                } else {
                    debug!(server = %self.name, command, "已寫入控制台命令");
                }
            }
            None => warn!(server = %self.name, "進程沒有標準輸入"),
        }
    }

    /// 開啟控制台輸出轉送，沒有輸出讀取器時返回 false
    pub async fn enable_console_logging(&self) -> bool {
        let reader = self.reader.lock().clone();
        match reader {
            Some(reader) => {
                reader.buffer().enable_echo().await;
                true
            }
            None => false,
        }
    }

    pub fn disable_console_logging(&self) {
        let reader = self.reader.lock().clone();
        if let Some(reader) = reader {
            reader.buffer().disable_echo();
        }
    }

    /// 最近的控制台輸出
    pub fn console_lines(&self) -> Vec<String> {
        let reader = self.reader.lock().clone();
        reader
            .map(|r| r.buffer().recent_lines())
            .unwrap_or_default()
    }

    fn spawn_exit(self: &Arc<Self>) {
        tokio::spawn(self.clone().on_exit());
    }

    /// 退出清理，每一步獨立執行，單步失敗只記錄
    async fn on_exit(self: Arc<Self>) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(server = %self.name, "伺服器已退出，開始清理");

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.cancel().await;
        }

        self.force_kill();
        self.set_status(ServerStatus::Stopped);
        self.cancel_timers();

        self.notify_proxies();

        if let Err(e) = self.archive_logs().await {
            error!(server = %self.name, "歸檔日誌失敗: {}", e);
        }

        if let Err(e) = self.remove_directory().await {
            error!(server = %self.name, "刪除實例目錄失敗: {}", e);
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self);
        }
        {
            let mut cached = self.cached.write();
            *cached = false;
            self.ctx.cache.remove(self.as_ref());
        }

        self.ctx.events.call(CloudEvent::ServerExit {
            server: self.clone(),
        });

        self.exit_signal.send_replace(true);
        debug!(server = %self.name, "退出清理完成");
    }

    fn notify_proxies(&self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        for proxy in manager.proxy_servers() {
            if proxy.name == self.name {
                continue;
            }
            let packet = Packet::new(PacketBody::RemoveServer {
                server: self.name.clone(),
            })
            .with_to(proxy.name.to_lowercase());
            self.ctx.broker.publish(packet);
        }
    }

    async fn archive_logs(&self) -> ServerResult<()> {
        if self.is_static() {
            return Ok(());
        }
        let Some(logs_path) = self.server_type.logs_path.as_ref() else {
            return Ok(());
        };

        let source = self.directory.join(logs_path);
        let logs_dir = self.ctx.directories.logs_dir();
        let target = logs_dir.join(format!("{}_{}.log", self.name, current_timestamp_ms()));
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || -> ServerResult<()> {
            if !source.is_file() {
                debug!(server = %name, path = %source.display(), "沒有可歸檔的日誌");
                return Ok(());
            }
            std::fs::create_dir_all(&logs_dir)?;
            std::fs::copy(&source, &target)?;
            info!(server = %name, target = %target.display(), "已歸檔伺服器日誌");
            Ok(())
        })
        .await?
    }

    async fn remove_directory(&self) -> ServerResult<()> {
        if self.is_static() {
            return Ok(());
        }

        match tokio::fs::remove_dir_all(&self.directory).await {
            Ok(()) => {
                debug!(server = %self.name, "已刪除實例目錄");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn watch_process(
    server: Arc<Server>,
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    handle: Arc<ProcessHandle>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        Some(()) = kill_rx.recv() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                warn!(server = %server.name, "終止進程失敗: {}", e);
            }
            child.wait().await
        }
    };
    handle.alive.store(false, Ordering::Release);

    match status {
        Ok(status) => info!(server = %server.name, code = ?status.code(), "進程已結束"),
        Err(e) => warn!(server = %server.name, "等待進程結束失敗: {}", e),
    }

    server.on_exit().await;
}

async fn write_command(stdin: &mut ChildStdin, command: &str) -> io::Result<()> {
    stdin.write_all(command.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("template", &self.template.name())
            .field("status", &self.status())
            .field("port", &self.port)
            .finish()
    }
}

/// 快取中的伺服器文件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerData {
    pub name: String,
    pub uuid: Uuid,
    pub template: String,
    pub status: ServerStatus,
    pub server_type: String,
    pub port: u16,
    pub proxy: bool,
    pub connected_players: Vec<Uuid>,
    pub extra_data: Value,
}

impl Cacheable for Server {
    const CACHE_PREFIX: &'static str = SERVER_PREFIX;
    type Document = ServerData;

    fn cache_id(&self) -> String {
        self.name.to_uppercase()
    }

    fn to_document(&self) -> ServerData {
        ServerData {
            name: self.name.clone(),
            uuid: self.uuid,
            template: self.template.name().to_string(),
            status: self.status(),
            server_type: self.server_type.name.clone(),
            port: self.port,
            proxy: self.server_type.is_proxy,
            connected_players: self.players(),
            extra_data: self.extra_data(),
        }
    }
}
