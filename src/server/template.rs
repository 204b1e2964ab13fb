//! 伺服器類型與模板
//!
//! 類型描述如何啟動和停止一種工作進程；模板描述如何維持一組可互換的實例。

use crate::server::manager::ServerManager;
use crate::utils::elapsed_since_ms;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

fn default_stop_command() -> String {
    "stop".to_string()
}

/// 伺服器類型，載入後不再變動
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerType {
    pub name: String,
    pub start_command: Vec<String>,
    pub is_proxy: bool,
    /// 相對於實例目錄的日誌檔路徑
    #[serde(default)]
    pub logs_path: Option<String>,
    pub port_setting_file: String,
    pub port_setting_placeholder: String,
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
}

/// 模板的固定設定
#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub max_players: usize,
    pub min_servers: usize,
    pub max_servers: usize,
    pub static_server: bool,
    pub separator: String,
    pub max_boot_time: Duration,
    pub shutdown_time: Duration,
    pub stop_on_empty: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            max_players: 20,
            min_servers: 0,
            max_servers: 1,
            static_server: false,
            separator: "-".to_string(),
            max_boot_time: Duration::from_millis(60_000),
            shutdown_time: Duration::from_millis(5_000),
            stop_on_empty: false,
        }
    }
}

/// 模板
#[derive(Debug)]
pub struct Template {
    name: String,
    server_type: Arc<ServerType>,
    settings: TemplateSettings,
    running_servers: AtomicUsize,
    stop_on_empty: AtomicBool,
}

impl Template {
    pub fn new(name: impl Into<String>, server_type: Arc<ServerType>, settings: TemplateSettings) -> Self {
        let stop_on_empty = settings.stop_on_empty;
        Self {
            name: name.into(),
            server_type,
            settings,
            running_servers: AtomicUsize::new(0),
            stop_on_empty: AtomicBool::new(stop_on_empty),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_type(&self) -> &Arc<ServerType> {
        &self.server_type
    }

    pub fn max_players(&self) -> usize {
        self.settings.max_players
    }

    pub fn min_servers(&self) -> usize {
        self.settings.min_servers
    }

    pub fn max_servers(&self) -> usize {
        self.settings.max_servers
    }

    pub fn is_static(&self) -> bool {
        self.settings.static_server
    }

    pub fn separator(&self) -> &str {
        &self.settings.separator
    }

    pub fn max_boot_time(&self) -> Duration {
        self.settings.max_boot_time
    }

    pub fn shutdown_time(&self) -> Duration {
        self.settings.shutdown_time
    }

    pub fn running_servers(&self) -> usize {
        self.running_servers.load(Ordering::Acquire)
    }

    pub(crate) fn increment_running(&self) {
        self.running_servers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stop_on_empty(&self) -> bool {
        self.stop_on_empty.load(Ordering::Acquire)
    }

    pub fn set_stop_on_empty(&self, value: bool) {
        self.stop_on_empty.store(value, Ordering::Release);
    }

    /// 實例名稱：模板名 + 分隔符 + 編號
    pub fn instance_name(&self, id: u32) -> String {
        format!("{}{}{}", self.name, self.settings.separator, id)
    }

    /// 自動擴縮的單次評估
    ///
    /// 每次最多建立一個實例，剩餘的缺口由下一次評估繼續補足。
    pub async fn check_servers(self: &Arc<Self>, manager: &Arc<ServerManager>) {
        let servers = manager.get_servers_by_template(self);
        let running = servers.len();
        self.running_servers.store(running, Ordering::Release);

        if self.stop_on_empty() {
            let idle_timeout = manager.idle_timeout().as_millis() as u64;
            for server in &servers {
                let idle = elapsed_since_ms(server.last_player_update()) > idle_timeout;
                if server.player_count() == 0 && idle {
                    info!(server = %server.name(), template = %self.name, "伺服器閒置過久，準備關閉");
                    server.kill(false).await;
                }
            }
        }

        // 非 RUNNING/STARTING/PREPARED 的實例視為阻塞（包含正常關閉中的實例）
        let blocked = servers.iter().filter(|s| !s.status().is_active()).count();
        let min = self.settings.min_servers;

        let needs_more = min > 0 && running < min;
        let all_blocked = min > 0 && !servers.is_empty() && blocked == servers.len();
        // 已達上限時不再建立，即使所有實例都被阻塞
        let can_create = running < self.settings.max_servers;

        debug!(
            template = %self.name,
            running,
            blocked,
            needs_more,
            all_blocked,
            "模板檢查"
        );

        if (needs_more || all_blocked) && can_create {
            if let Err(e) = manager.start_server(self, None).await {
                error!(template = %self.name, "自動建立伺服器失敗: {}", e);
            }
        }
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_type() -> ServerType {
        ServerType {
            name: "proxy".into(),
            start_command: vec!["sh".into(), "run.sh".into()],
            is_proxy: true,
            logs_path: None,
            port_setting_file: "config.yml".into(),
            port_setting_placeholder: "%PORT%".into(),
            stop_command: "end".into(),
        }
    }

    #[test]
    fn test_server_type_descriptor_defaults() {
        let json = r#"{
            "name": "paper",
            "startCommand": ["java", "-jar", "server.jar"],
            "isProxy": false,
            "logsPath": null,
            "portSettingFile": "server.properties",
            "portSettingPlaceholder": "%PORT%"
        }"#;
        let parsed: ServerType = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.stop_command, "stop");
        assert_eq!(parsed.logs_path, None);
        assert_eq!(parsed.start_command.len(), 3);
    }

    #[test]
    fn test_instance_name_uses_separator() {
        let template = Template::new(
            "Lobby",
            Arc::new(proxy_type()),
            TemplateSettings {
                separator: "_".into(),
                ..TemplateSettings::default()
            },
        );
        assert_eq!(template.instance_name(3), "Lobby_3");
    }

    #[test]
    fn test_stop_on_empty_toggle() {
        let template = Template::new(
            "lobby",
            Arc::new(proxy_type()),
            TemplateSettings {
                stop_on_empty: true,
                ..TemplateSettings::default()
            },
        );
        assert!(template.stop_on_empty());
        template.set_stop_on_empty(false);
        assert!(!template.stop_on_empty());
    }
}
