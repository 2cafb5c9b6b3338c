use crate::StorageError;
use chrono::{DateTime, Utc};
use photopro_core::{Client, Direction, EmailAccount, EmailMessage, EmailThread, Provider};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Mutable thread fields written on every re-observation of a remote thread.
///
/// `client_id` of `None` leaves an existing link untouched.
#[derive(Debug, Clone)]
pub struct ThreadChanges {
    pub subject: String,
    pub snippet: String,
    pub participant_emails: Vec<String>,
    pub client_id: Option<Uuid>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub last_message_at: DateTime<Utc>,
}

/// Handle over the mail-sync SQLite database. Cheap to clone; open it once at
/// start-up and call [`Storage::close`] on shutdown.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    /// Single-connection in-memory database; the data lives as long as the pool.
    pub async fn connect_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- Accounts ----

    pub async fn upsert_email_account(&self, account: &EmailAccount) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO email_accounts (
              id, organization_id, email_address, provider, is_active, sync_enabled,
              sync_cursor, last_sync_at, error_message, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
              organization_id = excluded.organization_id,
              email_address = excluded.email_address,
              provider = excluded.provider,
              is_active = excluded.is_active,
              sync_enabled = excluded.sync_enabled,
              sync_cursor = excluded.sync_cursor,
              last_sync_at = excluded.last_sync_at,
              error_message = excluded.error_message,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.organization_id)
        .bind(&account.email_address)
        .bind(account.provider.as_str())
        .bind(account.is_active)
        .bind(account.sync_enabled)
        .bind(&account.sync_cursor)
        .bind(account.last_sync_at.map(|value| value.to_rfc3339()))
        .bind(&account.error_message)
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_email_account(
        &self,
        account_id: Uuid,
    ) -> Result<Option<EmailAccount>, StorageError> {
        let row = sqlx::query("SELECT * FROM email_accounts WHERE id = ?1")
            .bind(account_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_account).transpose()
    }

    pub async fn list_email_accounts(
        &self,
        organization_id: &str,
    ) -> Result<Vec<EmailAccount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_accounts
            WHERE organization_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_account).collect()
    }

    /// Active, sync-enabled accounts of a tenant, optionally narrowed to one.
    pub async fn list_sync_accounts(
        &self,
        organization_id: &str,
        account_id: Option<Uuid>,
    ) -> Result<Vec<EmailAccount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_accounts
            WHERE organization_id = ?1
              AND is_active = 1
              AND sync_enabled = 1
              AND (?2 IS NULL OR id = ?2)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(organization_id)
        .bind(account_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_account).collect()
    }

    pub async fn list_sync_organizations(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT organization_id FROM email_accounts
            WHERE is_active = 1 AND sync_enabled = 1
            ORDER BY organization_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("organization_id")
                    .map_err(StorageError::from)
            })
            .collect()
    }

    /// Marks a sync as completed. A `None` cursor keeps the stored one.
    pub async fn record_sync_success(
        &self,
        account_id: Uuid,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE email_accounts SET
              sync_cursor = COALESCE(?2, sync_cursor),
              last_sync_at = ?3,
              error_message = NULL,
              updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(account_id.to_string())
        .bind(cursor)
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "email account", account_id)
    }

    pub async fn record_sync_error(
        &self,
        account_id: Uuid,
        message: &str,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE email_accounts SET error_message = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(account_id.to_string())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "email account", account_id)
    }

    pub async fn deactivate_email_account(
        &self,
        account_id: Uuid,
        message: &str,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE email_accounts SET
              is_active = 0,
              error_message = ?2,
              updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(account_id.to_string())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "email account", account_id)
    }

    // ---- Threads ----

    pub async fn find_email_thread(
        &self,
        account_id: Uuid,
        provider_thread_id: &str,
    ) -> Result<Option<EmailThread>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM email_threads
            WHERE email_account_id = ?1 AND provider_thread_id = ?2
            "#,
        )
        .bind(account_id.to_string())
        .bind(provider_thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_thread).transpose()
    }

    /// Inserts the thread, or applies its mutable fields to the row already
    /// holding the same (account, provider thread) key. Returns the row id.
    pub async fn upsert_email_thread(&self, thread: &EmailThread) -> Result<Uuid, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO email_threads (
              id, organization_id, email_account_id, provider_thread_id,
              subject, snippet, participant_emails_json, client_id,
              is_read, is_starred, is_archived, last_message_at,
              created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(email_account_id, provider_thread_id) DO UPDATE SET
              subject = excluded.subject,
              snippet = excluded.snippet,
              participant_emails_json = excluded.participant_emails_json,
              client_id = COALESCE(excluded.client_id, email_threads.client_id),
              is_read = excluded.is_read,
              is_starred = excluded.is_starred,
              is_archived = excluded.is_archived,
              last_message_at = excluded.last_message_at,
              updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(thread.id.to_string())
        .bind(&thread.organization_id)
        .bind(thread.email_account_id.to_string())
        .bind(&thread.provider_thread_id)
        .bind(&thread.subject)
        .bind(&thread.snippet)
        .bind(serde_json::to_string(&thread.participant_emails)?)
        .bind(thread.client_id.map(|id| id.to_string()))
        .bind(thread.is_read)
        .bind(thread.is_starred)
        .bind(thread.is_archived)
        .bind(thread.last_message_at.to_rfc3339())
        .bind(thread.created_at.to_rfc3339())
        .bind(thread.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let id_raw: String = row.try_get("id")?;
        parse_uuid(&id_raw, "email_threads.id")
    }

    pub async fn update_email_thread(
        &self,
        thread_id: Uuid,
        changes: &ThreadChanges,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE email_threads SET
              subject = ?2,
              snippet = ?3,
              participant_emails_json = ?4,
              client_id = COALESCE(?5, client_id),
              is_read = ?6,
              is_starred = ?7,
              is_archived = ?8,
              last_message_at = ?9,
              updated_at = ?10
            WHERE id = ?1
            "#,
        )
        .bind(thread_id.to_string())
        .bind(&changes.subject)
        .bind(&changes.snippet)
        .bind(serde_json::to_string(&changes.participant_emails)?)
        .bind(changes.client_id.map(|id| id.to_string()))
        .bind(changes.is_read)
        .bind(changes.is_starred)
        .bind(changes.is_archived)
        .bind(changes.last_message_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "email thread", thread_id)
    }

    pub async fn list_email_threads(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<EmailThread>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_threads
            WHERE email_account_id = ?1
            ORDER BY last_message_at DESC, id ASC
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_thread).collect()
    }

    pub async fn count_account_threads(&self, account_id: Uuid) -> Result<u64, StorageError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM email_threads WHERE email_account_id = ?1")
                .bind(account_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    /// `(total, unread)` thread counts for a tenant. Unread excludes archived.
    pub async fn organization_thread_counts(
        &self,
        organization_id: &str,
    ) -> Result<(u64, u64), StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
              COUNT(*) AS total_threads,
              COALESCE(SUM(CASE WHEN is_read = 0 AND is_archived = 0 THEN 1 ELSE 0 END), 0)
                AS unread_threads
            FROM email_threads
            WHERE organization_id = ?1
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total_threads")?;
        let unread: i64 = row.try_get("unread_threads")?;
        Ok((total.max(0) as u64, unread.max(0) as u64))
    }

    // ---- Messages ----

    pub async fn find_email_message_id(
        &self,
        thread_id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<Uuid>, StorageError> {
        let id_raw: Option<String> = sqlx::query_scalar(
            "SELECT id FROM email_messages WHERE thread_id = ?1 AND provider_message_id = ?2",
        )
        .bind(thread_id.to_string())
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        id_raw
            .as_deref()
            .map(|raw| parse_uuid(raw, "email_messages.id"))
            .transpose()
    }

    /// Returns `false` when a message with the same key already exists; the
    /// stored row is left untouched in that case.
    pub async fn insert_email_message(&self, message: &EmailMessage) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO email_messages (
              id, thread_id, provider_message_id, from_email, from_name,
              to_emails_json, to_names_json, cc_emails_json, bcc_emails_json,
              subject, body_html, body_text, direction, is_read, has_attachments,
              in_reply_to, references_json, sent_at, created_at
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5,
              ?6, ?7, ?8, ?9,
              ?10, ?11, ?12, ?13, ?14, ?15,
              ?16, ?17, ?18, ?19
            )
            ON CONFLICT(thread_id, provider_message_id) DO NOTHING
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.thread_id.to_string())
        .bind(&message.provider_message_id)
        .bind(&message.from_email)
        .bind(&message.from_name)
        .bind(serde_json::to_string(&message.to_emails)?)
        .bind(serde_json::to_string(&message.to_names)?)
        .bind(serde_json::to_string(&message.cc_emails)?)
        .bind(serde_json::to_string(&message.bcc_emails)?)
        .bind(&message.subject)
        .bind(&message.body_html)
        .bind(&message.body_text)
        .bind(message.direction.as_str())
        .bind(message.is_read)
        .bind(message.has_attachments)
        .bind(&message.in_reply_to)
        .bind(serde_json::to_string(&message.references)?)
        .bind(message.sent_at.to_rfc3339())
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_email_message_read(
        &self,
        message_id: Uuid,
        is_read: bool,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE email_messages SET is_read = ?2 WHERE id = ?1")
            .bind(message_id.to_string())
            .bind(is_read)
            .execute(&self.pool)
            .await?;

        ensure_updated(result.rows_affected(), "email message", message_id)
    }

    pub async fn list_email_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<EmailMessage>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_messages
            WHERE thread_id = ?1
            ORDER BY sent_at ASC, created_at ASC
            "#,
        )
        .bind(thread_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    // ---- Clients ----

    pub async fn upsert_client(&self, client: &Client) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, organization_id, full_name, email, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
              organization_id = excluded.organization_id,
              full_name = excluded.full_name,
              email = excluded.email
            "#,
        )
        .bind(client.id.to_string())
        .bind(&client.organization_id)
        .bind(&client.full_name)
        .bind(&client.email)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// First client of the organization (oldest wins) whose email matches any
    /// candidate, compared case-insensitively.
    pub async fn find_client_by_emails(
        &self,
        organization_id: &str,
        emails: &[String],
    ) -> Result<Option<Uuid>, StorageError> {
        if emails.is_empty() {
            return Ok(None);
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT id FROM clients WHERE organization_id = ");
        builder.push_bind(organization_id.to_string());
        builder.push(" AND LOWER(email) IN (");
        let mut separated = builder.separated(", ");
        for email in emails {
            separated.push_bind(email.trim().to_lowercase());
        }
        separated.push_unseparated(")");
        builder.push(" ORDER BY created_at ASC, id ASC LIMIT 1");

        let row = builder.build().fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let id_raw: String = row.try_get("id")?;
                Ok(Some(parse_uuid(&id_raw, "clients.id")?))
            }
            None => Ok(None),
        }
    }

    fn row_to_account(row: SqliteRow) -> Result<EmailAccount, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let provider_raw: String = row.try_get("provider")?;
        let last_sync_raw: Option<String> = row.try_get("last_sync_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(EmailAccount {
            id: parse_uuid(&id_raw, "email_accounts.id")?,
            organization_id: row.try_get("organization_id")?,
            email_address: row.try_get("email_address")?,
            provider: Provider::parse(&provider_raw).ok_or_else(|| {
                StorageError::Data(format!(
                    "invalid provider for email_accounts.provider: {provider_raw}"
                ))
            })?,
            is_active: row.try_get("is_active")?,
            sync_enabled: row.try_get("sync_enabled")?,
            sync_cursor: row.try_get("sync_cursor")?,
            last_sync_at: last_sync_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "email_accounts.last_sync_at"))
                .transpose()?,
            error_message: row.try_get("error_message")?,
            created_at: parse_datetime(&created_raw, "email_accounts.created_at")?,
            updated_at: parse_datetime(&updated_raw, "email_accounts.updated_at")?,
        })
    }

    fn row_to_thread(row: SqliteRow) -> Result<EmailThread, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let account_raw: String = row.try_get("email_account_id")?;
        let client_raw: Option<String> = row.try_get("client_id")?;
        let last_message_raw: String = row.try_get("last_message_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(EmailThread {
            id: parse_uuid(&id_raw, "email_threads.id")?,
            organization_id: row.try_get("organization_id")?,
            email_account_id: parse_uuid(&account_raw, "email_threads.email_account_id")?,
            provider_thread_id: row.try_get("provider_thread_id")?,
            subject: row.try_get("subject")?,
            snippet: row.try_get("snippet")?,
            participant_emails: parse_json(
                &row.try_get::<String, _>("participant_emails_json")?,
                "email_threads.participant_emails_json",
            )?,
            client_id: client_raw
                .as_deref()
                .map(|raw| parse_uuid(raw, "email_threads.client_id"))
                .transpose()?,
            is_read: row.try_get("is_read")?,
            is_starred: row.try_get("is_starred")?,
            is_archived: row.try_get("is_archived")?,
            last_message_at: parse_datetime(&last_message_raw, "email_threads.last_message_at")?,
            created_at: parse_datetime(&created_raw, "email_threads.created_at")?,
            updated_at: parse_datetime(&updated_raw, "email_threads.updated_at")?,
        })
    }

    fn row_to_message(row: SqliteRow) -> Result<EmailMessage, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let thread_raw: String = row.try_get("thread_id")?;
        let direction_raw: String = row.try_get("direction")?;
        let sent_raw: String = row.try_get("sent_at")?;
        let created_raw: String = row.try_get("created_at")?;

        Ok(EmailMessage {
            id: parse_uuid(&id_raw, "email_messages.id")?,
            thread_id: parse_uuid(&thread_raw, "email_messages.thread_id")?,
            provider_message_id: row.try_get("provider_message_id")?,
            from_email: row.try_get("from_email")?,
            from_name: row.try_get("from_name")?,
            to_emails: parse_json(
                &row.try_get::<String, _>("to_emails_json")?,
                "email_messages.to_emails_json",
            )?,
            to_names: parse_json(
                &row.try_get::<String, _>("to_names_json")?,
                "email_messages.to_names_json",
            )?,
            cc_emails: parse_json(
                &row.try_get::<String, _>("cc_emails_json")?,
                "email_messages.cc_emails_json",
            )?,
            bcc_emails: parse_json(
                &row.try_get::<String, _>("bcc_emails_json")?,
                "email_messages.bcc_emails_json",
            )?,
            subject: row.try_get("subject")?,
            body_html: row.try_get("body_html")?,
            body_text: row.try_get("body_text")?,
            direction: Direction::parse(&direction_raw).ok_or_else(|| {
                StorageError::Data(format!(
                    "invalid direction for email_messages.direction: {direction_raw}"
                ))
            })?,
            is_read: row.try_get("is_read")?,
            has_attachments: row.try_get("has_attachments")?,
            in_reply_to: row.try_get("in_reply_to")?,
            references: parse_json(
                &row.try_get::<String, _>("references_json")?,
                "email_messages.references_json",
            )?,
            sent_at: parse_datetime(&sent_raw, "email_messages.sent_at")?,
            created_at: parse_datetime(&created_raw, "email_messages.created_at")?,
        })
    }
}

fn ensure_updated(rows: u64, entity: &'static str, id: Uuid) -> Result<(), StorageError> {
    if rows == 0 {
        return Err(StorageError::NotFound {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid uuid for {field}: {err}")))
}

fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Data(format!("invalid datetime for {field}: {err}")))
}

fn parse_json<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid json for {field}: {err}")))
}
