use crate::{SecretKey, SecretStore, SecurityError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Hands out a currently valid access token for a mailbox, or `None` when the
/// account needs to be reconnected. Refreshing tokens happens elsewhere.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, account_id: Uuid) -> Result<Option<String>, SecurityError>;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StoredAccessToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredAccessToken {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS) > now,
            None => true,
        }
    }
}

impl std::fmt::Debug for StoredAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredAccessToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reads the access token the OAuth flow left in the OS keychain.
#[derive(Debug, Clone)]
pub struct KeychainTokenSource {
    secrets: SecretStore,
}

impl KeychainTokenSource {
    pub fn new(secrets: SecretStore) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl AccessTokenSource for KeychainTokenSource {
    async fn access_token(&self, account_id: Uuid) -> Result<Option<String>, SecurityError> {
        let Some(raw) = self
            .secrets
            .get(&SecretKey::mail_access_token(account_id))?
        else {
            tracing::debug!(%account_id, "no access token in keychain");
            return Ok(None);
        };

        let stored: StoredAccessToken = serde_json::from_str(&raw)?;
        if !stored.is_usable_at(Utc::now()) {
            tracing::debug!(%account_id, "keychain access token expired");
            return Ok(None);
        }

        Ok(Some(stored.access_token))
    }
}
