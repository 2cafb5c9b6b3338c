use crate::{EmailError, MailboxGateway, ThreadReconcile, ThreadReconciler, LABEL_INBOX};
use chrono::Utc;
use photopro_core::{
    AccountSyncStatus, EmailAccount, OrganizationSyncOptions, SyncOptions, SyncResult,
    SyncStatusReport,
};
use photopro_storage::Storage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Stored on an account that was deactivated for lack of a usable token.
pub const RECONNECT_MESSAGE: &str = "Failed to get access token. Please reconnect your account.";

const DEFAULT_FALLBACK_THREADS: usize = 20;
const DEFAULT_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub inbox_label: String,
    /// Cap on the listing used when incremental history is unavailable.
    pub fallback_threads: usize,
    /// Deadline per account inside an organization run; `None` disables it.
    pub account_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            inbox_label: LABEL_INBOX.to_string(),
            fallback_threads: DEFAULT_FALLBACK_THREADS,
            account_timeout: Some(DEFAULT_ACCOUNT_TIMEOUT),
        }
    }
}

/// Mailbox synchronization entry points: one account, a whole organization,
/// and the read-only status snapshot.
#[derive(Clone)]
pub struct EmailSyncService {
    storage: Storage,
    gateway: Arc<dyn MailboxGateway>,
    reconciler: ThreadReconciler,
    settings: SyncSettings,
    account_locks: Arc<Mutex<HashMap<Uuid, Arc<Semaphore>>>>,
}

impl EmailSyncService {
    pub fn new(storage: Storage, gateway: Arc<dyn MailboxGateway>, settings: SyncSettings) -> Self {
        Self {
            reconciler: ThreadReconciler::new(storage.clone(), gateway.clone()),
            storage,
            gateway,
            settings,
            account_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fails fast when another sync of the same account holds the permit.
    async fn try_lock_account(&self, account_id: Uuid) -> Result<OwnedSemaphorePermit, EmailError> {
        let semaphore = {
            let mut locks = self.account_locks.lock().await;
            locks
                .entry(account_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        semaphore
            .try_acquire_owned()
            .map_err(|_| EmailError::SyncInProgress(account_id))
    }

    /// Drops the account's lock entry once no run holds or awaits it.
    async fn evict_account_lock(&self, account_id: Uuid) {
        let mut locks = self.account_locks.lock().await;
        if locks
            .get(&account_id)
            .is_some_and(|semaphore| Arc::strong_count(semaphore) == 1)
        {
            locks.remove(&account_id);
        }
    }

    pub async fn sync_email_account(
        &self,
        account_id: Uuid,
        options: SyncOptions,
    ) -> Result<SyncResult, EmailError> {
        if options.max_threads == 0 {
            return Err(EmailError::Data("max_threads must be positive".to_string()));
        }

        let account = self
            .storage
            .get_email_account(account_id)
            .await?
            .ok_or(EmailError::AccountNotFound(account_id))?;
        let permit = match self.try_lock_account(account_id).await {
            Ok(permit) => permit,
            Err(err) => {
                self.evict_account_lock(account_id).await;
                return Err(err);
            }
        };
        let outcome = self.sync_locked_account(&account, options).await;
        drop(permit);
        self.evict_account_lock(account_id).await;
        outcome
    }

    async fn sync_locked_account(
        &self,
        account: &EmailAccount,
        options: SyncOptions,
    ) -> Result<SyncResult, EmailError> {
        let account_id = account.id;
        if account.provider != self.gateway.provider() {
            let err = EmailError::UnsupportedProvider(account.provider);
            self.record_failure(account_id, &err).await;
            return Err(err);
        }

        match self.gateway.access_token(account_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(
                    %account_id,
                    email = %account.email_address,
                    "no access token, deactivating account"
                );
                self.storage
                    .deactivate_email_account(account_id, RECONNECT_MESSAGE)
                    .await?;
                return Err(EmailError::Authentication(RECONNECT_MESSAGE.to_string()));
            }
            Err(err) => {
                self.record_failure(account_id, &err).await;
                return Err(err);
            }
        }

        match self.run_account_sync(account, options).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.record_failure(account_id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_account_sync(
        &self,
        account: &EmailAccount,
        options: SyncOptions,
    ) -> Result<SyncResult, EmailError> {
        let mut result = SyncResult::started(account);
        let profile = self.gateway.fetch_profile(account.id).await?;

        let thread_ids = match account.sync_cursor.as_deref() {
            Some(cursor) if !options.full_sync => {
                tracing::debug!(account_id = %account.id, cursor, "incremental sync");
                self.changed_thread_ids(account, cursor, options.max_threads)
                    .await?
            }
            _ => {
                tracing::debug!(account_id = %account.id, "full sync");
                self.inbox_thread_ids(account.id, options.max_threads).await?
            }
        };

        for provider_thread_id in &thread_ids {
            match self
                .reconciler
                .reconcile_thread(account, provider_thread_id)
                .await?
            {
                ThreadReconcile::Missing => {}
                ThreadReconcile::Synced(outcome) => {
                    result.threads_processed += 1;
                    result.messages_processed += outcome.messages_count;
                    if outcome.is_new {
                        result.new_threads += 1;
                    } else {
                        result.updated_threads += 1;
                    }
                }
            }
        }

        let cursor = profile.as_ref().map(|profile| profile.history_id.as_str());
        self.storage
            .record_sync_success(account.id, cursor, Utc::now())
            .await?;

        tracing::info!(
            account_id = %account.id,
            threads = result.threads_processed,
            messages = result.messages_processed,
            new_threads = result.new_threads,
            "account sync finished"
        );
        Ok(result)
    }

    async fn inbox_thread_ids(
        &self,
        account_id: Uuid,
        max_threads: usize,
    ) -> Result<Vec<String>, EmailError> {
        let labels = [self.settings.inbox_label.clone()];
        let listing = self
            .gateway
            .list_thread_summaries(account_id, max_threads, &labels)
            .await?;

        Ok(listing
            .map(|list| {
                list.threads
                    .into_iter()
                    .take(max_threads)
                    .map(|summary| summary.id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn changed_thread_ids(
        &self,
        account: &EmailAccount,
        cursor: &str,
        max_threads: usize,
    ) -> Result<Vec<String>, EmailError> {
        let history = self.gateway.fetch_history(account.id, cursor).await?;
        let Some(history) = history.filter(|history| !history.history.is_empty()) else {
            let limit = max_threads.min(self.settings.fallback_threads).max(1);
            tracing::info!(
                account_id = %account.id,
                limit,
                "no history since cursor, falling back to inbox listing"
            );
            return self.inbox_thread_ids(account.id, limit).await;
        };

        let mut seen = HashSet::new();
        let mut thread_ids: Vec<String> = Vec::new();
        for thread_id in history
            .history
            .iter()
            .flat_map(|record| record.changed_thread_ids())
        {
            if seen.insert(thread_id) {
                thread_ids.push(thread_id.to_string());
            }
        }

        if thread_ids.len() > max_threads {
            tracing::warn!(
                account_id = %account.id,
                dropped = thread_ids.len() - max_threads,
                "changed threads exceed max_threads, remainder skipped this run"
            );
            thread_ids.truncate(max_threads);
        }
        Ok(thread_ids)
    }

    async fn record_failure(&self, account_id: Uuid, err: &EmailError) {
        tracing::warn!(%account_id, error = %err, "account sync failed");
        if let Err(record_err) = self
            .storage
            .record_sync_error(account_id, &err.to_string())
            .await
        {
            tracing::error!(%account_id, error = %record_err, "failed to record sync error");
        }
    }

    /// Syncs every active, sync-enabled account of the organization in turn.
    /// A failing account yields a failed result and the run continues.
    pub async fn sync_organization_emails(
        &self,
        organization_id: &str,
        options: OrganizationSyncOptions,
    ) -> Result<Vec<SyncResult>, EmailError> {
        let accounts = self
            .storage
            .list_sync_accounts(organization_id, options.account_id)
            .await?;

        let mut results = Vec::with_capacity(accounts.len());
        for account in &accounts {
            match self.sync_with_deadline(account, options.sync).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::warn!(
                        %organization_id,
                        account_id = %account.id,
                        error = %err,
                        "account skipped in organization sync"
                    );
                    results.push(SyncResult::failed(account, err.to_string()));
                }
            }
        }

        let failed = results.iter().filter(|result| !result.success).count();
        tracing::info!(
            %organization_id,
            accounts = results.len(),
            failed,
            "organization sync finished"
        );
        Ok(results)
    }

    async fn sync_with_deadline(
        &self,
        account: &EmailAccount,
        options: SyncOptions,
    ) -> Result<SyncResult, EmailError> {
        let Some(limit) = self.settings.account_timeout else {
            return self.sync_email_account(account.id, options).await;
        };

        match tokio::time::timeout(limit, self.sync_email_account(account.id, options)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = EmailError::TimedOut {
                    account_id: account.id,
                    secs: limit.as_secs(),
                };
                self.record_failure(account.id, &err).await;
                self.evict_account_lock(account.id).await;
                Err(err)
            }
        }
    }

    pub async fn email_sync_status(
        &self,
        organization_id: &str,
    ) -> Result<SyncStatusReport, EmailError> {
        let accounts = self.storage.list_email_accounts(organization_id).await?;

        let mut statuses = Vec::with_capacity(accounts.len());
        for account in accounts {
            let thread_count = self.storage.count_account_threads(account.id).await?;
            statuses.push(AccountSyncStatus {
                id: account.id,
                email: account.email_address,
                provider: account.provider,
                is_active: account.is_active,
                sync_enabled: account.sync_enabled,
                last_sync_at: account.last_sync_at,
                error_message: account.error_message,
                thread_count,
            });
        }

        let (total_threads, unread_threads) = self
            .storage
            .organization_thread_counts(organization_id)
            .await?;

        Ok(SyncStatusReport {
            accounts: statuses,
            total_threads,
            unread_threads,
        })
    }
}
