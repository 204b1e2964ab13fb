use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 雲端調度器在基礎目錄下使用的目錄佈局
#[derive(Debug, Clone)]
pub struct Directories {
    base: PathBuf,
}

impl Directories {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// 臨時伺服器的實例目錄
    pub fn temp_dir(&self) -> PathBuf {
        self.base.join("tmp")
    }

    /// 靜態伺服器的持久目錄
    pub fn servers_dir(&self) -> PathBuf {
        self.base.join("servers")
    }

    /// 模板檔案樹
    pub fn templates_dir(&self) -> PathBuf {
        self.base.join("templates")
    }

    /// 模板描述檔
    pub fn template_configs_dir(&self) -> PathBuf {
        self.base.join("template_configs")
    }

    /// 伺服器類型描述檔
    pub fn types_dir(&self) -> PathBuf {
        self.base.join("types")
    }

    /// 歸檔日誌
    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// 建立所有基礎目錄
    pub fn create_all(&self) -> io::Result<()> {
        for dir in [
            self.temp_dir(),
            self.servers_dir(),
            self.templates_dir(),
            self.template_configs_dir(),
            self.types_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
            debug!("目錄已就緒: {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_all() {
        let base = tempfile::tempdir().unwrap();
        let dirs = Directories::new(base.path());
        dirs.create_all().unwrap();

        assert!(dirs.temp_dir().is_dir());
        assert!(dirs.logs_dir().is_dir());
        assert_eq!(dirs.types_dir(), base.path().join("types"));
    }
}
