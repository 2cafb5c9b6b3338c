use crate::{
    has_attachments, parse_address, parse_address_list, split_references, ClientMatcher,
    EmailError, MailboxGateway, RemoteMessage, RemoteThread, ThreadFetch, LABEL_INBOX,
    LABEL_STARRED, LABEL_UNREAD,
};
use chrono::{DateTime, Utc};
use photopro_core::{Direction, EmailAccount, EmailMessage, EmailThread};
use photopro_storage::{Storage, ThreadChanges};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

const NO_SUBJECT: &str = "(No Subject)";
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub thread_id: Uuid,
    /// The local thread row did not exist before this reconcile.
    pub is_new: bool,
    /// Messages newly stored; re-observed messages are not counted.
    pub messages_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadReconcile {
    /// The remote thread vanished or had no messages.
    Missing,
    Synced(ThreadOutcome),
}

/// Thread-level fields derived from every message of a remote thread.
#[derive(Debug, Clone)]
struct ThreadFields {
    subject: String,
    snippet: String,
    participant_emails: Vec<String>,
    is_read: bool,
    is_starred: bool,
    is_archived: bool,
    last_message_at: DateTime<Utc>,
}

/// Upserts local thread and message rows from remote threads.
#[derive(Clone)]
pub struct ThreadReconciler {
    storage: Storage,
    gateway: Arc<dyn MailboxGateway>,
    matcher: ClientMatcher,
}

impl ThreadReconciler {
    pub fn new(storage: Storage, gateway: Arc<dyn MailboxGateway>) -> Self {
        Self {
            matcher: ClientMatcher::new(storage.clone()),
            storage,
            gateway,
        }
    }

    pub async fn reconcile_thread(
        &self,
        account: &EmailAccount,
        provider_thread_id: &str,
    ) -> Result<ThreadReconcile, EmailError> {
        let remote = match self.gateway.fetch_thread(account.id, provider_thread_id).await? {
            ThreadFetch::Found(thread) if !thread.messages.is_empty() => thread,
            _ => {
                tracing::debug!(
                    account_id = %account.id,
                    provider_thread_id,
                    "remote thread missing or empty, skipping"
                );
                return Ok(ThreadReconcile::Missing);
            }
        };

        let fields = self.thread_fields(&remote);
        let client_id = self
            .matcher
            .match_client(account, &fields.participant_emails)
            .await?;

        let existing = self
            .storage
            .find_email_thread(account.id, provider_thread_id)
            .await?;

        let (thread_id, is_new) = match existing {
            Some(thread) => {
                let changes = ThreadChanges {
                    subject: fields.subject,
                    snippet: fields.snippet,
                    participant_emails: fields.participant_emails,
                    client_id,
                    is_read: fields.is_read,
                    is_starred: fields.is_starred,
                    is_archived: fields.is_archived,
                    last_message_at: fields.last_message_at,
                };
                self.storage.update_email_thread(thread.id, &changes).await?;
                (thread.id, false)
            }
            None => {
                let now = Utc::now();
                let thread = EmailThread {
                    id: Uuid::new_v4(),
                    organization_id: account.organization_id.clone(),
                    email_account_id: account.id,
                    provider_thread_id: provider_thread_id.to_string(),
                    subject: fields.subject,
                    snippet: fields.snippet,
                    participant_emails: fields.participant_emails,
                    client_id,
                    is_read: fields.is_read,
                    is_starred: fields.is_starred,
                    is_archived: fields.is_archived,
                    last_message_at: fields.last_message_at,
                    created_at: now,
                    updated_at: now,
                };
                (self.storage.upsert_email_thread(&thread).await?, true)
            }
        };

        let mut messages_count = 0;
        for message in &remote.messages {
            if self.reconcile_message(account, thread_id, message).await? {
                messages_count += 1;
            }
        }

        Ok(ThreadReconcile::Synced(ThreadOutcome {
            thread_id,
            is_new,
            messages_count,
        }))
    }

    /// Stores one remote message. Returns `true` when it was newly created;
    /// an already stored message only has its read flag refreshed.
    pub async fn reconcile_message(
        &self,
        account: &EmailAccount,
        thread_id: Uuid,
        message: &RemoteMessage,
    ) -> Result<bool, EmailError> {
        let is_read = !message.has_label(LABEL_UNREAD);

        if let Some(message_id) = self
            .storage
            .find_email_message_id(thread_id, &message.id)
            .await?
        {
            self.storage
                .set_email_message_read(message_id, is_read)
                .await?;
            return Ok(false);
        }

        let headers = self.gateway.parse_headers(&message.payload.headers);
        let body = self.gateway.extract_body(message);

        let (from_email, from_name) = headers
            .get("from")
            .map(|raw| parse_address(raw))
            .unwrap_or_default();
        let to = parse_address_list(headers.get("to").map(String::as_str));
        let cc = parse_address_list(headers.get("cc").map(String::as_str));

        let direction = if account.owns_address(&from_email) {
            Direction::Outbound
        } else {
            Direction::Inbound
        };

        let record = EmailMessage {
            id: Uuid::new_v4(),
            thread_id,
            provider_message_id: message.id.clone(),
            from_email,
            from_name,
            to_emails: to.iter().map(|(email, _)| email.clone()).collect(),
            to_names: to
                .iter()
                .map(|(_, name)| name.clone().unwrap_or_default())
                .collect(),
            cc_emails: cc.into_iter().map(|(email, _)| email).collect(),
            bcc_emails: Vec::new(),
            subject: headers
                .get("subject")
                .cloned()
                .unwrap_or_else(|| NO_SUBJECT.to_string()),
            body_html: body.html,
            body_text: body.text,
            direction,
            is_read,
            has_attachments: has_attachments(&message.payload),
            in_reply_to: headers.get("in-reply-to").cloned(),
            references: split_references(headers.get("references").map(String::as_str)),
            sent_at: sent_at(message, &headers),
            created_at: Utc::now(),
        };

        Ok(self.storage.insert_email_message(&record).await?)
    }

    fn thread_fields(&self, thread: &RemoteThread) -> ThreadFields {
        let mut participants = BTreeSet::new();
        let mut last_message_at: Option<DateTime<Utc>> = None;
        let mut subject = None;

        for (idx, message) in thread.messages.iter().enumerate() {
            let headers = self.gateway.parse_headers(&message.payload.headers);
            if idx == 0 {
                subject = headers.get("subject").cloned();
            }

            let from = headers.get("from").map(|raw| parse_address(raw).0);
            let recipients = ["to", "cc"].into_iter().flat_map(|name| {
                parse_address_list(headers.get(name).map(String::as_str))
                    .into_iter()
                    .map(|(email, _)| email)
            });
            for email in from.into_iter().chain(recipients) {
                let email = email.trim().to_lowercase();
                if !email.is_empty() {
                    participants.insert(email);
                }
            }

            let sent = sent_at(message, &headers);
            last_message_at = Some(last_message_at.map_or(sent, |latest| latest.max(sent)));
        }

        let snippet = thread
            .messages
            .last()
            .map(|last| {
                let text = self
                    .gateway
                    .extract_body(last)
                    .text
                    .filter(|text| !text.trim().is_empty());
                text.or_else(|| last.snippet.clone()).unwrap_or_default()
            })
            .map(|snippet| snippet.trim().chars().take(SNIPPET_CHARS).collect::<String>())
            .unwrap_or_default();

        ThreadFields {
            subject: subject
                .filter(|subject| !subject.trim().is_empty())
                .unwrap_or_else(|| NO_SUBJECT.to_string()),
            snippet,
            participant_emails: participants.into_iter().collect(),
            is_read: !thread.messages.iter().any(|m| m.has_label(LABEL_UNREAD)),
            is_starred: thread.messages.iter().any(|m| m.has_label(LABEL_STARRED)),
            is_archived: !thread.messages.iter().any(|m| m.has_label(LABEL_INBOX)),
            last_message_at: last_message_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Provider receive time, then the `Date` header, then now.
fn sent_at(message: &RemoteMessage, headers: &HashMap<String, String>) -> DateTime<Utc> {
    message
        .internal_date
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| {
            headers
                .get("date")
                .and_then(|raw| mailparse::dateparse(raw).ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        })
        .unwrap_or_else(Utc::now)
}
