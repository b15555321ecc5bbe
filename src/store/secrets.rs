use std::collections::HashMap;
use std::sync::Mutex;

use crate::AuthError;

/// Secure storage for refresh tokens, keyed by account name.
pub trait SecretStore: Send + Sync {
    fn get(&self, account: &str) -> Result<Option<String>, AuthError>;

    fn store(&self, account: &str, refresh_token: &str) -> Result<(), AuthError>;

    /// Deleting an absent entry succeeds.
    fn delete(&self, account: &str) -> Result<(), AuthError>;
}

/// OS-native credential store via the `keyring` crate (macOS Keychain,
/// Windows Credential Manager, Linux Secret Service).
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringSecretStore {
    pub fn new() -> Self {
        Self::with_service("ee-connect")
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, account).map_err(|err| AuthError::SecretStore {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for KeyringSecretStore {
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        match self.entry(account)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(AuthError::SecretStore {
                message: err.to_string(),
            }),
        }
    }

    fn store(&self, account: &str, refresh_token: &str) -> Result<(), AuthError> {
        self.entry(account)?
            .set_password(refresh_token)
            .map_err(|err| AuthError::SecretStore {
                message: err.to_string(),
            })
    }

    fn delete(&self, account: &str) -> Result<(), AuthError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(AuthError::SecretStore {
                message: err.to_string(),
            }),
        }
    }
}

/// Process-local secret store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AuthError> {
        self.secrets.lock().map_err(|_| AuthError::SecretStore {
            message: "secret store lock poisoned".to_string(),
        })
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        Ok(self.lock()?.get(account).cloned())
    }

    fn store(&self, account: &str, refresh_token: &str) -> Result<(), AuthError> {
        self.lock()?
            .insert(account.to_string(), refresh_token.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), AuthError> {
        self.lock()?.remove(account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemorySecretStore, SecretStore};

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.store("a", "1//refresh").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1//refresh"));
        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }
}
