use crate::{gmail, parser, EmailError};
use async_trait::async_trait;
use photopro_core::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadList {
    #[serde(default)]
    pub threads: Vec<ThreadSummary>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteThread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Epoch milliseconds, as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

impl RemoteMessage {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|candidate| candidate == label)
    }
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// base64url-encoded content.
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxProfile {
    #[serde(default)]
    pub email_address: Option<String>,
    pub history_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryList {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub history_id: Option<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messages_added: Vec<HistoryMessage>,
    #[serde(default)]
    pub messages_deleted: Vec<HistoryMessage>,
    #[serde(default)]
    pub labels_added: Vec<HistoryLabelChange>,
    #[serde(default)]
    pub labels_removed: Vec<HistoryLabelChange>,
}

impl HistoryRecord {
    /// Thread ids implicated by added or deleted messages.
    ///
    /// Label-only changes are not mapped, so read-state edits made purely
    /// through labels are only picked up by the next full sync.
    pub fn changed_thread_ids(&self) -> impl Iterator<Item = &str> {
        self.messages_added
            .iter()
            .chain(self.messages_deleted.iter())
            .filter_map(|entry| entry.message.thread_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub message: MessageRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLabelChange {
    pub message: MessageRef,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// Result of fetching one remote thread. `NotFound` is a normal outcome: a
/// thread can disappear between listing and fetch.
#[derive(Debug, Clone)]
pub enum ThreadFetch {
    Found(RemoteThread),
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Remote mailbox capabilities the synchronizer consumes. `Ok(None)` from the
/// listing calls means the provider had nothing to return, not a failure.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// The only account provider this gateway can talk to.
    fn provider(&self) -> Provider;

    async fn access_token(&self, account_id: Uuid) -> Result<Option<String>, EmailError>;

    async fn list_thread_summaries(
        &self,
        account_id: Uuid,
        max_results: usize,
        label_ids: &[String],
    ) -> Result<Option<ThreadList>, EmailError>;

    async fn fetch_thread(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<ThreadFetch, EmailError>;

    async fn fetch_profile(&self, account_id: Uuid) -> Result<Option<MailboxProfile>, EmailError>;

    async fn fetch_history(
        &self,
        account_id: Uuid,
        since_cursor: &str,
    ) -> Result<Option<HistoryList>, EmailError>;

    fn parse_headers(&self, headers: &[MessageHeader]) -> HashMap<String, String> {
        parser::headers_map(headers)
    }

    fn extract_body(&self, message: &RemoteMessage) -> MessageBody {
        gmail::extract_body(&message.payload)
    }
}
