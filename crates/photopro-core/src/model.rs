use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default cap on remote thread fetches per account sync.
pub const DEFAULT_MAX_THREADS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Some(Self::Gmail),
            "outlook" | "microsoft" => Some(Self::Outlook),
            _ => None,
        }
    }
}

/// A connected mailbox belonging to one organization.
///
/// `sync_cursor` stays `None` until the first full sync completes. An inactive
/// account always carries the reason in `error_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAccount {
    pub id: Uuid,
    pub organization_id: String,
    pub email_address: String,
    pub provider: Provider,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub sync_cursor: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailAccount {
    pub fn new(
        organization_id: impl Into<String>,
        email_address: impl Into<String>,
        provider: Provider,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            email_address: email_address.into(),
            provider,
            is_active: true,
            sync_enabled: true,
            sync_cursor: None,
            last_sync_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive comparison against this mailbox's own address.
    pub fn owns_address(&self, address: &str) -> bool {
        self.email_address.trim().eq_ignore_ascii_case(address.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailThread {
    pub id: Uuid,
    pub organization_id: String,
    pub email_account_id: Uuid,
    pub provider_thread_id: String,
    pub subject: String,
    pub snippet: String,
    /// Lower-cased, sorted and de-duplicated.
    pub participant_emails: Vec<String>,
    pub client_id: Option<Uuid>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INBOUND" => Some(Self::Inbound),
            "OUTBOUND" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub provider_message_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_emails: Vec<String>,
    /// Parallel to `to_emails`; unnamed recipients hold an empty string.
    pub to_names: Vec<String>,
    pub cc_emails: Vec<String>,
    pub bcc_emails: Vec<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub direction: Direction,
    pub is_read: bool,
    pub has_attachments: bool,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A business contact. Only looked up by email here, never written by sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub organization_id: String,
    pub full_name: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_threads: usize,
    pub full_sync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            full_sync: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationSyncOptions {
    /// Restrict the run to a single account of the organization.
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub sync: SyncOptions,
}

/// Outcome of one account sync. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub account_id: Uuid,
    pub email: String,
    pub threads_processed: usize,
    pub messages_processed: usize,
    pub new_threads: usize,
    pub updated_threads: usize,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn started(account: &EmailAccount) -> Self {
        Self {
            success: true,
            account_id: account.id,
            email: account.email_address.clone(),
            threads_processed: 0,
            messages_processed: 0,
            new_threads: 0,
            updated_threads: 0,
            error: None,
        }
    }

    pub fn failed(account: &EmailAccount, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::started(account)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSyncStatus {
    pub id: Uuid,
    pub email: String,
    pub provider: Provider,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub thread_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub accounts: Vec<AccountSyncStatus>,
    pub total_threads: u64,
    pub unread_threads: u64,
}
