use crate::ConfigError;
use photopro_core::SyncOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub version: u32,
    pub profile_name: String,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    pub max_threads: usize,
    /// Thread cap used when an incremental cursor turns out to be stale.
    pub fallback_threads: usize,
    /// Deadline for a single account sync. Zero disables it.
    pub account_timeout_secs: u64,
    pub inbox_label: String,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.file_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sync.max_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.max_threads",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.sync.inbox_label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "sync.inbox_label",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_threads: self.max_threads.max(1),
            full_sync: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GmailConfig {
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    pub keychain_service: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            keychain_service: "com.photoproos.mail-sync".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            profile_name: "default".to_string(),
            database: DatabaseConfig {
                file_name: "photopro-mail.sqlite3".to_string(),
            },
            sync: SyncConfig {
                poll_interval_secs: 300,
                max_threads: photopro_core::DEFAULT_MAX_THREADS,
                fallback_threads: 20,
                account_timeout_secs: 120,
                inbox_label: "INBOX".to_string(),
            },
            gmail: GmailConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}
