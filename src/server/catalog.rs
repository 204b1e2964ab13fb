//! 類型與模板目錄的載入
//!
//! `types/*.json` 為伺服器類型描述，`template_configs/*.json` 為模板描述。
//! 無法解析的檔案與引用未知類型的模板會記錄錯誤後略過。

use crate::server::template::{ServerType, Template, TemplateSettings};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

fn default_shutdown_time_ms() -> u64 {
    5_000
}

fn default_max_boot_time_ms() -> u64 {
    60_000
}

fn default_separator() -> String {
    "-".to_string()
}

/// 模板描述檔
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub max_players: usize,
    pub min_servers: usize,
    pub max_servers: usize,
    pub static_server: bool,
    #[serde(default = "default_shutdown_time_ms")]
    pub shutdown_time_ms: u64,
    #[serde(default = "default_max_boot_time_ms")]
    pub max_boot_time_ms: u64,
    #[serde(default)]
    pub stop_on_empty: bool,
    #[serde(default = "default_separator", alias = "seperator")]
    pub separator: String,
}

impl TemplateDescriptor {
    pub fn into_template(self, server_type: Arc<ServerType>) -> Template {
        Template::new(
            self.name,
            server_type,
            TemplateSettings {
                max_players: self.max_players,
                min_servers: self.min_servers,
                max_servers: self.max_servers,
                static_server: self.static_server,
                separator: self.separator,
                max_boot_time: Duration::from_millis(self.max_boot_time_ms),
                shutdown_time: Duration::from_millis(self.shutdown_time_ms),
                stop_on_empty: self.stop_on_empty,
            },
        )
    }
}

/// 已載入的目錄
#[derive(Debug, Default)]
pub struct Catalog {
    pub types: HashMap<String, Arc<ServerType>>,
    pub templates: HashMap<String, Arc<Template>>,
}

impl Catalog {
    /// 從兩個描述目錄載入
    pub fn load(types_dir: &Path, templates_dir: &Path) -> Catalog {
        let mut catalog = Catalog::default();

        for file in json_files(types_dir) {
            if let Some(server_type) = read_json::<ServerType>(&file) {
                debug!(server_type = %server_type.name, "已載入伺服器類型");
                catalog
                    .types
                    .insert(server_type.name.clone(), Arc::new(server_type));
            }
        }
        info!("已載入 {} 個伺服器類型", catalog.types.len());

        for file in json_files(templates_dir) {
            let Some(descriptor) = read_json::<TemplateDescriptor>(&file) else {
                continue;
            };

            let Some(server_type) = catalog.types.get(&descriptor.type_name).cloned() else {
                error!(
                    template = %descriptor.name,
                    "模板引用了未知的伺服器類型: {}",
                    descriptor.type_name
                );
                continue;
            };

            let template = descriptor.into_template(server_type);
            debug!(template = %template.name(), "已載入模板");
            catalog
                .templates
                .insert(template.name().to_string(), Arc::new(template));
        }
        info!("已載入 {} 個模板", catalog.templates.len());

        catalog
    }
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("無法讀取目錄 {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn read_json<T: for<'de> Deserialize<'de>>(file: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            error!("無法讀取描述檔 {}: {}", file.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("無法解析描述檔 {}: {}", file.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_catalog() {
        let dir = TempDir::new().unwrap();
        let types = dir.path().join("types");
        let templates = dir.path().join("template_configs");
        fs::create_dir_all(&types).unwrap();
        fs::create_dir_all(&templates).unwrap();

        fs::write(
            types.join("proxy.json"),
            r#"{"name":"proxy","startCommand":["sh","start.sh"],"isProxy":true,"logsPath":"logs/latest.log","portSettingFile":"config.yml","portSettingPlaceholder":"%PORT%","stopCommand":"end"}"#,
        )
        .unwrap();
        fs::write(types.join("broken.json"), "{ nope").unwrap();
        fs::write(types.join("notes.txt"), "ignored").unwrap();

        fs::write(
            templates.join("Proxy.json"),
            r#"{"name":"Proxy","type":"proxy","maxPlayers":100,"minServers":1,"maxServers":1,"staticServer":true,"seperator":"_"}"#,
        )
        .unwrap();
        fs::write(
            templates.join("Lobby.json"),
            r#"{"name":"Lobby","type":"paper","maxPlayers":20,"minServers":1,"maxServers":3,"staticServer":false}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&types, &templates);

        assert_eq!(catalog.types.len(), 1);
        assert_eq!(catalog.types["proxy"].stop_command, "end");

        // Lobby 引用未知類型，被略過
        assert_eq!(catalog.templates.len(), 1);
        let proxy = &catalog.templates["Proxy"];
        assert_eq!(proxy.separator(), "_");
        assert_eq!(proxy.shutdown_time(), Duration::from_millis(5_000));
        assert_eq!(proxy.max_boot_time(), Duration::from_millis(60_000));
        assert!(!proxy.stop_on_empty());
        assert!(proxy.is_static());
    }

    #[test]
    fn test_missing_directory_yields_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::load(&dir.path().join("nope"), &dir.path().join("nope2"));
        assert!(catalog.types.is_empty());
        assert!(catalog.templates.is_empty());
    }
}
