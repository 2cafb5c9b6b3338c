use crate::{AppConfig, ConfigError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const ORG: &str = "com";
const AUTHOR: &str = "PhotoProOS";
const APP: &str = "PhotoProMailSync";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        Self::from_dirs(
            dirs.config_dir().to_path_buf(),
            dirs.data_dir().to_path_buf(),
        )
    }

    /// Keep config and data under a single root directory.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        Self::from_dirs(root.join("config"), root.join("data"))
    }

    fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&data_dir)?;

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            let initial = AppConfig::default();
            let content = toml::to_string_pretty(&initial)?;
            fs::write(&config_path, content)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Ok(Self {
            config_path,
            data_dir,
        })
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        self.data_dir.join(&config.database.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_config_on_first_run() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_root(root.path()).expect("manager");

        assert!(manager.config_path().exists());
        let config = manager.load().expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.sync.max_threads, 50);
        assert_eq!(config.sync.fallback_threads, 20);
    }

    #[test]
    fn with_root_creates_only_config_and_data_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_root(root.path()).expect("manager");

        assert!(root.path().join("config").is_dir());
        assert!(manager.data_dir().is_dir());
        assert!(!root.path().join("cache").exists());
    }

    #[test]
    fn saved_changes_survive_reload() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_root(root.path()).expect("manager");

        let mut config = manager.load().expect("load");
        config.sync.max_threads = 10;
        config.sync.inbox_label = "IMPORTANT".to_string();
        manager.save(&config).expect("save");

        let reopened = ConfigManager::with_root(root.path()).expect("manager");
        let loaded = reopened.load().expect("load");
        assert_eq!(loaded.sync.max_threads, 10);
        assert_eq!(loaded.sync.inbox_label, "IMPORTANT");
        assert_eq!(loaded.sync.sync_options().max_threads, 10);
    }

    #[test]
    fn rejects_zero_thread_cap() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_root(root.path()).expect("manager");
        let mut config = AppConfig::default();
        config.sync.max_threads = 0;
        manager.save(&config).expect("save");

        let err = manager.load().expect_err("zero cap rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "sync.max_threads",
                ..
            }
        ));
    }

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_root(root.path()).expect("manager");
        fs::write(
            manager.config_path(),
            r#"
version = 1
profile_name = "studio"

[database]
file_name = "mail.db"

[sync]
poll_interval_secs = 60
max_threads = 25
fallback_threads = 5
account_timeout_secs = 0
inbox_label = "INBOX"
"#,
        )
        .expect("write");

        let config = manager.load().expect("load");
        assert_eq!(config.gmail, crate::GmailConfig::default());
        assert_eq!(
            manager.database_path(&config),
            manager.data_dir().join("mail.db")
        );
    }
}
