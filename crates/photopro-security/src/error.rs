use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("keychain error: {0}")]
    Keychain(#[from] keyring::Error),
    #[error("stored credential is malformed: {0}")]
    Credential(#[from] serde_json::Error),
}
