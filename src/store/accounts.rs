use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{Account, AccountKind, AuthError};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub kind: AccountKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_access_token: Option<String>,
}

impl AccountRecord {
    pub fn into_account(self, name: impl Into<String>) -> Account {
        let mut account = Account::new(name, self.kind);
        account.cached_access_token = self.cached_access_token;
        account
    }
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("kind", &self.kind)
            .field(
                "cached_access_token",
                &self.cached_access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Registry of known accounts and their cached access tokens.
pub trait AccountStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<AccountRecord>, AuthError>;

    fn list(&self) -> Result<Vec<Account>, AuthError>;

    /// Adds an account without a token; keeps an existing entry's token.
    fn register(&self, name: &str, kind: AccountKind) -> Result<(), AuthError>;

    fn upsert_token(&self, name: &str, kind: AccountKind, token: &str) -> Result<(), AuthError>;

    /// Returns whether an entry was removed.
    fn delete(&self, name: &str) -> Result<bool, AuthError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: BTreeMap<String, AccountRecord>,
}

impl AccountsFile {
    fn register(&mut self, name: &str, kind: AccountKind) {
        self.accounts
            .entry(name.to_string())
            .and_modify(|record| {
                if record.kind != kind {
                    record.kind = kind;
                    record.cached_access_token = None;
                }
            })
            .or_insert(AccountRecord {
                kind,
                cached_access_token: None,
            });
    }

    fn upsert_token(&mut self, name: &str, kind: AccountKind, token: &str) {
        self.accounts.insert(
            name.to_string(),
            AccountRecord {
                kind,
                cached_access_token: Some(token.to_string()),
            },
        );
    }

    fn list(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|(name, record)| record.clone().into_account(name))
            .collect()
    }
}

/// JSON file under the user's config directory. Each operation reads the
/// file fresh so concurrent processes see each other's writes.
#[derive(Debug)]
pub struct FileAccountStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn default_path() -> Result<Self, AuthError> {
        crate::config::default_accounts_file()
            .map(Self::new)
            .ok_or_else(|| AuthError::AccountStore {
                message: "unable to determine a config directory".to_string(),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<T>(&self, apply: impl FnOnce(&mut AccountsFile) -> T) -> Result<T, AuthError> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut file = self.load()?;
        let value = apply(&mut file);
        self.save(&file)?;
        Ok(value)
    }

    fn read<T>(&self, apply: impl FnOnce(&AccountsFile) -> T) -> Result<T, AuthError> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        Ok(apply(&self.load()?))
    }

    fn load(&self) -> Result<AccountsFile, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|err| AuthError::AccountStore {
                    message: format!("{}: {err}", self.path.display()),
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(AccountsFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, file: &AccountsFile) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_vec_pretty(file).map_err(|err| AuthError::AccountStore {
            message: err.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AccountStore for FileAccountStore {
    fn get(&self, name: &str) -> Result<Option<AccountRecord>, AuthError> {
        self.read(|file| file.accounts.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<Account>, AuthError> {
        self.read(AccountsFile::list)
    }

    fn register(&self, name: &str, kind: AccountKind) -> Result<(), AuthError> {
        self.update(|file| file.register(name, kind))
    }

    fn upsert_token(&self, name: &str, kind: AccountKind, token: &str) -> Result<(), AuthError> {
        self.update(|file| file.upsert_token(name, kind, token))
    }

    fn delete(&self, name: &str) -> Result<bool, AuthError> {
        self.update(|file| file.accounts.remove(name).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    inner: Mutex<AccountsFile>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn get(&self, name: &str) -> Result<Option<AccountRecord>, AuthError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.accounts.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<Account>, AuthError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.list())
    }

    fn register(&self, name: &str, kind: AccountKind) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.register(name, kind);
        Ok(())
    }

    fn upsert_token(&self, name: &str, kind: AccountKind, token: &str) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.upsert_token(name, kind, token);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool, AuthError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.accounts.remove(name).is_some())
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::AccountStore {
        message: "account store lock poisoned".to_string(),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AuthError> {
    Ok(())
}
