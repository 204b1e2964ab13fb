#![allow(dead_code)]

use cloud_server::cache::MemoryCacheStore;
use cloud_server::config::ApplicationConfig;
use cloud_server::event::CloudEvent;
use cloud_server::messaging::{MemoryTransport, Packet, PacketBody, Transport};
use cloud_server::Cloud;
use parking_lot::Mutex;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 讀到 `stop` 後正常結束的工作進程
pub const WORKER_SCRIPT: &str = r#"while read line; do if [ "$line" = "stop" ]; then exit 0; fi; done"#;

/// 忽略停止命令的工作進程，只能被強制終止
pub const STUBBORN_SCRIPT: &str = r#"while read line; do :; done"#;

pub fn test_config(base: &Path) -> ApplicationConfig {
    let mut config = ApplicationConfig::default();
    config.cloud.base_dir = base.to_path_buf();
    config.cloud.check_interval_ms = 100;
    config.cloud.start_delay_ms = 20;
    config.cloud.stop_all_timeout_secs = 5;
    config.broker.response_timeout_ms = 1000;
    config
}

pub fn write_type(base: &Path, name: &str, is_proxy: bool, script: &str) {
    let dir = base.join("types");
    fs::create_dir_all(&dir).unwrap();
    let descriptor = json!({
        "name": name,
        "startCommand": ["sh", "-c", script],
        "isProxy": is_proxy,
        "logsPath": "logs/latest.log",
        "portSettingFile": "config.yml",
        "portSettingPlaceholder": "%PORT%",
        "stopCommand": "stop"
    });
    fs::write(dir.join(format!("{}.json", name)), descriptor.to_string()).unwrap();
}

/// 寫入模板描述與檔案樹，`extra` 會合併進描述
pub fn write_template(base: &Path, name: &str, type_name: &str, extra: serde_json::Value) {
    let configs = base.join("template_configs");
    fs::create_dir_all(&configs).unwrap();

    let mut descriptor = json!({
        "name": name,
        "type": type_name,
        "maxPlayers": 10,
        "minServers": 0,
        "maxServers": 3,
        "staticServer": false,
        "shutdownTimeMs": 1000,
        "maxBootTimeMs": 30000
    });
    if let (Some(target), Some(source)) = (descriptor.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    fs::write(configs.join(format!("{}.json", name)), descriptor.to_string()).unwrap();

    let files = base.join("templates").join(name);
    fs::create_dir_all(files.join("logs")).unwrap();
    fs::write(files.join("config.yml"), "port: %PORT%\n").unwrap();
    fs::write(files.join("logs/latest.log"), "booted\n").unwrap();
}

pub struct Fixture {
    pub dir: TempDir,
    pub transport: Arc<MemoryTransport>,
    pub cloud: Arc<Cloud>,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    /// 以調整過的配置建立調度器，`setup` 在啟動前寫入目錄檔
    pub async fn boot<F, C>(setup: F, configure: C) -> Fixture
    where
        F: FnOnce(&Path),
        C: FnOnce(&mut ApplicationConfig),
    {
        let dir = TempDir::new().unwrap();
        setup(dir.path());

        let mut config = test_config(dir.path());
        configure(&mut config);

        let transport = Arc::new(MemoryTransport::new());
        let cloud = Cloud::new(
            config,
            transport.clone(),
            Arc::new(MemoryCacheStore::new()),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = events.clone();
        cloud
            .events()
            .register(Arc::new(move |event: &mut CloudEvent| {
                recorded.lock().push(event.name().to_string());
            }));

        cloud.boot().await.unwrap();
        cloud.broker().wait_connected().await;

        Fixture {
            dir,
            transport,
            cloud,
            events,
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// 模擬工作進程送到主路由的封包
    pub async fn send_to_cloud(&self, from: &str, body: PacketBody) -> Packet {
        let packet = Packet::new(body).with_from(from).with_to("cloud");
        self.transport
            .publish("cloud", packet.encode())
            .await
            .unwrap();
        packet
    }
}

/// 輪詢直到條件成立或逾時
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
