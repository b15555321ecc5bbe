use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity that selects the CLI's application-default credentials.
pub const APPLICATION_DEFAULT: &str = "application-default";

/// Account backed by the persistent credential file.
pub const PERSISTENT_CREDENTIALS: &str = "earthengine";

/// How an account obtains fresh access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    #[serde(rename = "oauth_signed_in")]
    OAuthSignedIn,
    CliDerived,
    PersistentCredentialFile,
    ServiceAccountKey,
}

impl AccountKind {
    /// Whether tokens for this kind go through the account store cache.
    pub fn uses_cache(self) -> bool {
        !matches!(self, AccountKind::ServiceAccountKey)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccountKind::OAuthSignedIn => "signed in",
            AccountKind::CliDerived => "gcloud",
            AccountKind::PersistentCredentialFile => "earthengine credentials",
            AccountKind::ServiceAccountKey => "service account",
        };
        f.write_str(label)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub kind: AccountKind,
    pub cached_access_token: Option<String>,
    service_account_key: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cached_access_token: None,
            service_account_key: None,
        }
    }

    pub fn signed_in(name: impl Into<String>) -> Self {
        Self::new(name, AccountKind::OAuthSignedIn)
    }

    pub fn cli(name: impl Into<String>) -> Self {
        Self::new(name, AccountKind::CliDerived)
    }

    pub fn application_default() -> Self {
        Self::cli(APPLICATION_DEFAULT)
    }

    pub fn credential_file() -> Self {
        Self::new(PERSISTENT_CREDENTIALS, AccountKind::PersistentCredentialFile)
    }

    /// The key payload stays in memory only; it is never written to a store.
    pub fn service_account(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service_account_key: Some(key.into()),
            ..Self::new(name, AccountKind::ServiceAccountKey)
        }
    }

    pub fn with_cached_access_token(mut self, token: impl Into<String>) -> Self {
        self.cached_access_token = Some(token.into());
        self
    }

    pub fn service_account_key(&self) -> Option<&str> {
        self.service_account_key.as_deref()
    }

    pub fn is_application_default(&self) -> bool {
        self.name == APPLICATION_DEFAULT
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field(
                "cached_access_token",
                &self.cached_access_token.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "service_account_key",
                &self.service_account_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
