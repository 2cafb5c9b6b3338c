use photopro_core::Provider;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("storage error: {0}")]
    Storage(#[from] photopro_storage::StorageError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential error: {0}")]
    Security(#[from] photopro_security::SecurityError),
    #[error("email account {0} not found")]
    AccountNotFound(Uuid),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("access token rejected: {0}")]
    Unauthorized(String),
    #[error("{} mailboxes are not supported by this sync service", .0.as_str())]
    UnsupportedProvider(Provider),
    #[error("a sync is already running for email account {0}")]
    SyncInProgress(Uuid),
    #[error("sync of email account {account_id} timed out after {secs}s")]
    TimedOut { account_id: Uuid, secs: u64 },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid data: {0}")]
    Data(String),
}

impl EmailError {
    /// No usable access token exists for the account. Found before a run,
    /// this disables the account until the user reconnects it. A token the
    /// provider rejects mid-run is [`EmailError::Unauthorized`] instead.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}
