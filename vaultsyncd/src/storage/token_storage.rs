use keyring::Entry;
use thiserror::Error;
use vaultsync_integrations::ids::{KEYRING_ACCOUNT, KEYRING_SERVICE};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    KeyringError(#[from] keyring::Error),
    #[error("token not found")]
    TokenNotFound,
}

/// API token in the desktop secret service.
pub struct TokenStorage {
    entry: Entry,
}

impl TokenStorage {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            entry: Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?,
        })
    }

    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        self.entry.set_password(token)?;
        Ok(())
    }

    pub fn get_token(&self) -> Result<String, StorageError> {
        match self.entry.get_password() {
            Ok(token) => Ok(token),
            Err(keyring::Error::NoEntry) => Err(StorageError::TokenNotFound),
            Err(err) => Err(StorageError::KeyringError(err)),
        }
    }

    pub fn delete_token(&self) -> Result<(), StorageError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(StorageError::KeyringError(err)),
        }
    }
}

/// `VAULTSYNC_TOKEN` wins over the keyring; a missing keyring entry is not an
/// error.
pub fn resolve_token(env_token: Option<String>) -> Result<Option<String>, StorageError> {
    if let Some(token) = env_token.filter(|token| !token.trim().is_empty()) {
        return Ok(Some(token));
    }
    match TokenStorage::new()?.get_token() {
        Ok(token) => Ok(Some(token)),
        Err(StorageError::TokenNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}
