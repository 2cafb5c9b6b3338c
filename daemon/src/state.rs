use anyhow::Context;
use photopro_config::{AppConfig, ConfigManager};
use photopro_email::{EmailSyncService, GmailGateway, MailboxGateway, SyncSettings};
use photopro_security::{AccessTokenSource, KeychainTokenSource, SecretStore};
use photopro_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) storage: Storage,
    pub(crate) sync: EmailSyncService,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Self> {
        let config_manager = ConfigManager::new().context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;

        let db_path = config_manager.database_path(&config);
        let storage = Storage::connect(&db_path)
            .await
            .with_context(|| format!("open sqlite storage at {}", db_path.display()))?;

        let secrets = SecretStore::new(config.security.keychain_service.clone());
        let tokens: Arc<dyn AccessTokenSource> = Arc::new(KeychainTokenSource::new(secrets));
        let gateway: Arc<dyn MailboxGateway> = Arc::new(
            GmailGateway::new(
                config.gmail.api_base.clone(),
                Duration::from_secs(config.gmail.request_timeout_secs),
                tokens,
            )
            .context("build gmail client")?,
        );

        let sync = EmailSyncService::new(storage.clone(), gateway, sync_settings(&config));

        tracing::info!(
            profile = %config.profile_name,
            database = %db_path.display(),
            "mail sync state initialized"
        );

        Ok(Self {
            config,
            storage,
            sync,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.sync.poll_interval_secs.max(1))
    }

    /// One pass over every organization with sync-eligible accounts.
    pub async fn run_sync_cycle(&self) -> anyhow::Result<()> {
        let organizations = self
            .storage
            .list_sync_organizations()
            .await
            .context("list organizations to sync")?;

        let options = photopro_core::OrganizationSyncOptions {
            account_id: None,
            sync: self.config.sync.sync_options(),
        };

        for organization_id in &organizations {
            match self
                .sync
                .sync_organization_emails(organization_id, options.clone())
                .await
            {
                Ok(results) => {
                    let failed = results.iter().filter(|result| !result.success).count();
                    let threads: usize = results.iter().map(|result| result.threads_processed).sum();
                    tracing::info!(
                        %organization_id,
                        accounts = results.len(),
                        failed,
                        threads,
                        "organization sync cycle completed"
                    );
                }
                Err(err) => {
                    tracing::error!(%organization_id, "organization sync failed: {err}");
                }
            }
        }

        Ok(())
    }

    pub async fn shutdown(&self) {
        self.storage.close().await;
    }
}

fn sync_settings(config: &AppConfig) -> SyncSettings {
    SyncSettings {
        inbox_label: config.sync.inbox_label.clone(),
        fallback_threads: config.sync.fallback_threads.max(1),
        account_timeout: (config.sync.account_timeout_secs > 0)
            .then(|| Duration::from_secs(config.sync.account_timeout_secs)),
    }
}
