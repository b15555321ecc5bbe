//! One token-acquisition strategy per [`AccountKind`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{Account, AccountKind, AuthError, CredentialPayload, SecretStore, TokenClient};

/// Mints a fresh access token for an account of one kind.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn kind(&self) -> AccountKind;

    async fn fetch(&self, account: &Account) -> Result<String, AuthError>;
}

/// `OAuthSignedIn`: refresh token from the secret store, refresh grant.
pub struct RefreshTokenSource {
    client: Arc<TokenClient>,
    secrets: Arc<dyn SecretStore>,
}

impl RefreshTokenSource {
    pub fn new(client: Arc<TokenClient>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { client, secrets }
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    fn kind(&self) -> AccountKind {
        AccountKind::OAuthSignedIn
    }

    async fn fetch(&self, account: &Account) -> Result<String, AuthError> {
        let refresh_token = self
            .secrets
            .get(&account.name)?
            .ok_or_else(|| AuthError::MissingRefreshToken {
                account: account.name.clone(),
            })?;

        let record = self.client.refresh(&refresh_token).await?;
        if let Some(rotated) = record.refresh_token.as_deref() {
            if rotated != refresh_token {
                debug!(account = %account.name, "storing rotated refresh token");
                self.secrets.store(&account.name, rotated)?;
            }
        }
        Ok(record.access_token)
    }
}

/// `CliDerived`: `<cli> auth print-access-token <identity>`.
pub struct CliTokenSource {
    program: String,
}

impl CliTokenSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(account: &Account) -> Vec<&str> {
        if account.is_application_default() {
            vec!["auth", "application-default", "print-access-token"]
        } else {
            vec!["auth", "print-access-token", account.name.as_str()]
        }
    }
}

#[async_trait]
impl TokenSource for CliTokenSource {
    fn kind(&self) -> AccountKind {
        AccountKind::CliDerived
    }

    async fn fetch(&self, account: &Account) -> Result<String, AuthError> {
        let args = Self::args(account);
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "invoking cli for access token");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AuthError::CliUnavailable {
                program: self.program.clone(),
                message: err.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(AuthError::CliExecutionFailed {
                command,
                stderr: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AuthError::CliExecutionFailed {
                command,
                stderr: if stderr.is_empty() {
                    "no access token printed".to_string()
                } else {
                    stderr
                },
            });
        }
        Ok(token)
    }
}

/// `PersistentCredentialFile`: refresh grant from the credential file the
/// Python client writes.
pub struct CredentialFileSource {
    client: Arc<TokenClient>,
    path: PathBuf,
}

impl CredentialFileSource {
    pub fn new(client: Arc<TokenClient>, path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    async fn read_credentials(&self) -> Result<Map<String, Value>, AuthError> {
        let unreadable = |message: String| AuthError::CredentialFileUnreadable {
            path: self.path.clone(),
            message,
        };

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| unreadable(err.to_string()))?;
        let credentials: Map<String, Value> =
            serde_json::from_str(&contents).map_err(|err| unreadable(err.to_string()))?;

        match credentials.get("refresh_token") {
            Some(Value::String(token)) if !token.is_empty() => Ok(credentials),
            _ => Err(unreadable("missing refresh_token".to_string())),
        }
    }
}

#[async_trait]
impl TokenSource for CredentialFileSource {
    fn kind(&self) -> AccountKind {
        AccountKind::PersistentCredentialFile
    }

    async fn fetch(&self, _account: &Account) -> Result<String, AuthError> {
        let credentials = self.read_credentials().await?;
        let record = self
            .client
            .exchange(CredentialPayload::CredentialFile(credentials))
            .await?;
        Ok(record.access_token)
    }
}

/// `ServiceAccountKey`: the supplied key payload is the credential.
#[derive(Debug, Default)]
pub struct ServiceAccountSource;

#[async_trait]
impl TokenSource for ServiceAccountSource {
    fn kind(&self) -> AccountKind {
        AccountKind::ServiceAccountKey
    }

    async fn fetch(&self, account: &Account) -> Result<String, AuthError> {
        info!(account = %account.name, "using supplied service account key");
        account
            .service_account_key()
            .map(str::to_string)
            .ok_or_else(|| AuthError::MissingServiceAccountKey {
                account: account.name.clone(),
            })
    }
}
