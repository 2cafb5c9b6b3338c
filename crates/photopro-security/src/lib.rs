mod error;
mod keychain;
mod token;

pub use error::SecurityError;
pub use keychain::{SecretKey, SecretStore};
pub use token::{AccessTokenSource, KeychainTokenSource, StoredAccessToken};
