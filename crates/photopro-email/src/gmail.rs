use crate::{
    EmailError, HistoryList, MailboxGateway, MailboxProfile, MessageBody, MessagePart,
    RemoteThread, ThreadFetch, ThreadList,
};
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use photopro_core::Provider;
use photopro_security::AccessTokenSource;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on history pages followed in one incremental pass.
const MAX_HISTORY_PAGES: usize = 10;

/// Gmail REST implementation of [`MailboxGateway`].
#[derive(Clone)]
pub struct GmailGateway {
    client: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GmailGateway {
    pub fn new(
        api_base: impl Into<String>,
        request_timeout: Duration,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn bearer_token(&self, account_id: Uuid) -> Result<String, EmailError> {
        self.tokens
            .access_token(account_id)
            .await?
            .ok_or_else(|| {
                EmailError::Authentication(format!("no Gmail access token for account {account_id}"))
            })
    }

    /// GET against the Gmail API; a 404 maps to `Ok(None)`.
    async fn get_json<T>(
        &self,
        account_id: Uuid,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, EmailError>
    where
        T: DeserializeOwned,
    {
        let token = self.bearer_token(account_id).await?;
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%account_id, path, "Gmail resource not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, account_id, path));
        }

        Ok(Some(response.json().await?))
    }
}

/// A rejected token stays transient; only a missing token deactivates an account.
fn status_error(status: StatusCode, account_id: Uuid, path: &str) -> EmailError {
    if status == StatusCode::UNAUTHORIZED {
        EmailError::Unauthorized(format!(
            "Gmail rejected the access token for account {account_id}"
        ))
    } else {
        EmailError::Provider(format!("Gmail request {path} failed with status {status}"))
    }
}

#[async_trait]
impl MailboxGateway for GmailGateway {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn access_token(&self, account_id: Uuid) -> Result<Option<String>, EmailError> {
        Ok(self.tokens.access_token(account_id).await?)
    }

    async fn list_thread_summaries(
        &self,
        account_id: Uuid,
        max_results: usize,
        label_ids: &[String],
    ) -> Result<Option<ThreadList>, EmailError> {
        let mut query = vec![("maxResults", max_results.to_string())];
        for label in label_ids {
            query.push(("labelIds", label.clone()));
        }

        self.get_json(account_id, "/users/me/threads", &query).await
    }

    async fn fetch_thread(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<ThreadFetch, EmailError> {
        let thread: Option<RemoteThread> = self
            .get_json(
                account_id,
                &format!("/users/me/threads/{thread_id}"),
                &[("format", "full".to_string())],
            )
            .await?;

        Ok(match thread {
            Some(thread) => ThreadFetch::Found(thread),
            None => ThreadFetch::NotFound,
        })
    }

    async fn fetch_profile(&self, account_id: Uuid) -> Result<Option<MailboxProfile>, EmailError> {
        self.get_json(account_id, "/users/me/profile", &[]).await
    }

    async fn fetch_history(
        &self,
        account_id: Uuid,
        since_cursor: &str,
    ) -> Result<Option<HistoryList>, EmailError> {
        let mut merged: Option<HistoryList> = None;
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_HISTORY_PAGES {
            let mut query = vec![("startHistoryId", since_cursor.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let Some(page) = self
                .get_json::<HistoryList>(account_id, "/users/me/history", &query)
                .await?
            else {
                // Gmail answers 404 once the start id has aged out.
                return Ok(None);
            };

            page_token = page.next_page_token.clone();
            match merged.as_mut() {
                Some(all) => {
                    all.history.extend(page.history);
                    all.history_id = page.history_id.or(all.history_id.take());
                }
                None => merged = Some(page),
            }

            if page_token.is_none() {
                break;
            }
        }

        if page_token.is_some() {
            tracing::warn!(%account_id, "history paging stopped at page limit");
        }

        Ok(merged)
    }
}

/// First `text/plain` and `text/html` bodies in the part tree. Named parts are
/// attachments and skipped; HTML is sanitized.
pub fn extract_body(payload: &MessagePart) -> MessageBody {
    let mut body = MessageBody::default();
    collect_bodies(payload, &mut body);
    body.html = body.html.map(|html| ammonia::clean(&html));
    body
}

fn collect_bodies(part: &MessagePart, body: &mut MessageBody) {
    let is_attachment = part
        .filename
        .as_deref()
        .is_some_and(|name| !name.is_empty());

    if !is_attachment {
        let mime_type = part
            .mime_type
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let decoded = part.body.data.as_deref().and_then(decode_body_data);

        if let Some(content) = decoded {
            if mime_type == "text/plain" && body.text.is_none() {
                body.text = Some(content);
            } else if mime_type == "text/html" && body.html.is_none() {
                body.html = Some(content);
            }
        }
    }

    for child in &part.parts {
        if body.text.is_some() && body.html.is_some() {
            return;
        }
        collect_bodies(child, body);
    }
}

fn decode_body_data(raw: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('=').as_bytes())
        .or_else(|_| URL_SAFE.decode(raw.as_bytes()))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartBody;

    fn encoded(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text.as_bytes())
    }

    fn leaf(mime_type: &str, data: &str, filename: Option<&str>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            filename: filename.map(str::to_string),
            body: PartBody {
                data: Some(encoded(data)),
                ..PartBody::default()
            },
            ..MessagePart::default()
        }
    }

    #[test]
    fn rejected_token_is_not_treated_as_missing() {
        let account_id = Uuid::new_v4();
        let err = status_error(StatusCode::UNAUTHORIZED, account_id, "/users/me/profile");
        assert!(matches!(err, EmailError::Unauthorized(_)));
        assert!(!err.is_authentication());

        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, account_id, "/users/me/profile");
        assert!(matches!(err, EmailError::Provider(ref message) if message.contains("500")));
    }

    #[test]
    fn extracts_text_and_html_from_alternative_parts() {
        let payload = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            parts: vec![
                MessagePart {
                    mime_type: Some("multipart/alternative".to_string()),
                    parts: vec![
                        leaf("text/plain", "Hello from the studio", None),
                        leaf("text/html", "<p>Hello<script>alert(1)</script></p>", None),
                    ],
                    ..MessagePart::default()
                },
                leaf("text/plain", "attached notes", Some("notes.txt")),
            ],
            ..MessagePart::default()
        };

        let body = extract_body(&payload);
        assert_eq!(body.text.as_deref(), Some("Hello from the studio"));
        let html = body.html.expect("html body");
        assert!(html.contains("<p>Hello</p>"));
        assert!(!html.contains("script"));
    }

    #[test]
    fn single_part_message_uses_root_body() {
        let body = extract_body(&leaf("text/plain", "just text", None));
        assert_eq!(body.text.as_deref(), Some("just text"));
        assert!(body.html.is_none());
    }

    #[test]
    fn padded_and_garbage_data_are_handled() {
        assert_eq!(decode_body_data("aGk=").as_deref(), Some("hi"));
        assert!(decode_body_data("***").is_none());
    }
}
