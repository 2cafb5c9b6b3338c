//! Scripted in-memory mailbox used by the sync tests.

use crate::{
    EmailError, HistoryList, HistoryMessage, HistoryRecord, MailboxGateway, MailboxProfile,
    MessageHeader, MessagePart, MessageRef, PartBody, RemoteMessage, RemoteThread, ThreadFetch,
    ThreadList, ThreadSummary,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use photopro_core::{EmailAccount, Provider};
use photopro_storage::Storage;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct FakeState {
    threads: HashMap<String, RemoteThread>,
    inbox: Vec<String>,
    history: Option<HistoryList>,
    profile_history_id: String,
    missing_tokens: HashSet<Uuid>,
    failing_tokens: HashSet<Uuid>,
    failing_threads: HashSet<String>,
    list_calls: Vec<usize>,
    history_calls: Vec<String>,
    profile_delay: Option<Duration>,
}

pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                profile_history_id: "1000".to_string(),
                ..FakeState::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake gateway state");
        f(&mut state)
    }

    /// Serves the thread and lists it in the inbox, newest first.
    pub fn add_thread(&self, thread: RemoteThread) {
        self.with_state(|state| {
            state.inbox.insert(0, thread.id.clone());
            state.threads.insert(thread.id.clone(), thread);
        });
    }

    /// Replaces a served thread without touching the inbox listing.
    pub fn replace_thread(&self, thread: RemoteThread) {
        self.with_state(|state| {
            state.threads.insert(thread.id.clone(), thread);
        });
    }

    pub fn list_only(&self, thread_id: &str) {
        self.with_state(|state| state.inbox.insert(0, thread_id.to_string()));
    }

    pub fn set_history(&self, history: Option<HistoryList>) {
        self.with_state(|state| state.history = history);
    }

    pub fn set_profile_history_id(&self, history_id: &str) {
        self.with_state(|state| state.profile_history_id = history_id.to_string());
    }

    pub fn set_profile_delay(&self, delay: Duration) {
        self.with_state(|state| state.profile_delay = Some(delay));
    }

    pub fn revoke_token(&self, account_id: Uuid) {
        self.with_state(|state| {
            state.missing_tokens.insert(account_id);
        });
    }

    pub fn fail_token(&self, account_id: Uuid) {
        self.with_state(|state| {
            state.failing_tokens.insert(account_id);
        });
    }

    /// Makes fetching the thread fail as a provider error.
    pub fn fail_thread(&self, thread_id: &str) {
        self.with_state(|state| {
            state.failing_threads.insert(thread_id.to_string());
        });
    }

    pub fn list_calls(&self) -> Vec<usize> {
        self.with_state(|state| state.list_calls.clone())
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.with_state(|state| state.history_calls.clone())
    }
}

#[async_trait]
impl MailboxGateway for FakeGateway {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn access_token(&self, account_id: Uuid) -> Result<Option<String>, EmailError> {
        self.with_state(|state| {
            if state.failing_tokens.contains(&account_id) {
                return Err(EmailError::Provider("token endpoint unavailable".to_string()));
            }
            if state.missing_tokens.contains(&account_id) {
                return Ok(None);
            }
            Ok(Some(format!("token-{account_id}")))
        })
    }

    async fn list_thread_summaries(
        &self,
        _account_id: Uuid,
        max_results: usize,
        _label_ids: &[String],
    ) -> Result<Option<ThreadList>, EmailError> {
        Ok(self.with_state(|state| {
            state.list_calls.push(max_results);
            Some(ThreadList {
                threads: state
                    .inbox
                    .iter()
                    .take(max_results)
                    .map(|id| ThreadSummary {
                        id: id.clone(),
                        ..ThreadSummary::default()
                    })
                    .collect(),
                next_page_token: None,
            })
        }))
    }

    async fn fetch_thread(
        &self,
        _account_id: Uuid,
        thread_id: &str,
    ) -> Result<ThreadFetch, EmailError> {
        self.with_state(|state| {
            if state.failing_threads.contains(thread_id) {
                return Err(EmailError::Provider(format!("fetch of thread {thread_id} failed")));
            }
            Ok(match state.threads.get(thread_id) {
                Some(thread) => ThreadFetch::Found(thread.clone()),
                None => ThreadFetch::NotFound,
            })
        })
    }

    async fn fetch_profile(&self, _account_id: Uuid) -> Result<Option<MailboxProfile>, EmailError> {
        let (delay, history_id) =
            self.with_state(|state| (state.profile_delay, state.profile_history_id.clone()));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(MailboxProfile {
            email_address: None,
            history_id,
        }))
    }

    async fn fetch_history(
        &self,
        _account_id: Uuid,
        since_cursor: &str,
    ) -> Result<Option<HistoryList>, EmailError> {
        Ok(self.with_state(|state| {
            state.history_calls.push(since_cursor.to_string());
            state.history.clone()
        }))
    }
}

pub async fn storage_with_account(email: &str) -> (Storage, EmailAccount) {
    let storage = Storage::connect_in_memory().await.expect("in-memory storage");
    let account = EmailAccount::new("org_1", email, Provider::Gmail);
    storage
        .upsert_email_account(&account)
        .await
        .expect("account saved");
    (storage, account)
}

pub fn header(name: &str, value: &str) -> MessageHeader {
    MessageHeader {
        name: name.to_string(),
        value: value.to_string(),
    }
}

pub fn message(id: &str, from: &str, to: &str, labels: &[&str], text: &str) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        thread_id: None,
        label_ids: labels.iter().map(|label| label.to_string()).collect(),
        snippet: Some(format!("snippet of {id}")),
        internal_date: Some("1700000000000".to_string()),
        payload: MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: vec![
                header("Subject", "Wedding shoot"),
                header("From", from),
                header("To", to),
            ],
            body: PartBody {
                data: Some(URL_SAFE_NO_PAD.encode(text.as_bytes())),
                ..PartBody::default()
            },
            ..MessagePart::default()
        },
    }
}

pub fn thread(id: &str, messages: Vec<RemoteMessage>) -> RemoteThread {
    RemoteThread {
        id: id.to_string(),
        messages: messages
            .into_iter()
            .map(|mut message| {
                message.thread_id = Some(id.to_string());
                message
            })
            .collect(),
    }
}

/// Inbound single-message thread from `client@x.com`.
pub fn inbox_thread(id: &str) -> RemoteThread {
    thread(
        id,
        vec![message(
            &format!("{id}-m1"),
            "Client <client@x.com>",
            "studio@biz.com",
            &["INBOX"],
            "Hello",
        )],
    )
}

pub fn history_with_added(thread_ids: &[&str]) -> HistoryList {
    HistoryList {
        history: thread_ids
            .iter()
            .enumerate()
            .map(|(idx, thread_id)| HistoryRecord {
                id: Some((idx + 1).to_string()),
                messages_added: vec![HistoryMessage {
                    message: MessageRef {
                        id: format!("{thread_id}-new"),
                        thread_id: Some(thread_id.to_string()),
                    },
                }],
                ..HistoryRecord::default()
            })
            .collect(),
        history_id: Some("2000".to_string()),
        next_page_token: None,
    }
}
