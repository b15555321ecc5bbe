use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::flow::{Notifier, TracingNotifier};
use crate::sources::{
    CliTokenSource, CredentialFileSource, RefreshTokenSource, ServiceAccountSource, TokenSource,
};
use crate::{
    Account, AccountKind, AccountStore, AuthError, AuthorizationSession, BrokerConfig,
    SecretStore, TokenClient, TokenStatus,
};

/// Entry point for callers that need an access token for an account.
///
/// Reuses a cached token while introspection still accepts it, otherwise
/// mints one through the strategy matching the account's kind.
pub struct TokenBroker {
    client: Arc<TokenClient>,
    accounts: Arc<dyn AccountStore>,
    secrets: Arc<dyn SecretStore>,
    notifier: Arc<dyn Notifier>,
    signed_in: RefreshTokenSource,
    cli: CliTokenSource,
    credential_file: CredentialFileSource,
    service_account: ServiceAccountSource,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenBroker {
    pub fn new(
        client: TokenClient,
        accounts: Arc<dyn AccountStore>,
        secrets: Arc<dyn SecretStore>,
        config: BrokerConfig,
    ) -> Self {
        let client = Arc::new(client);
        Self {
            signed_in: RefreshTokenSource::new(Arc::clone(&client), Arc::clone(&secrets)),
            cli: CliTokenSource::new(config.cli_program),
            credential_file: CredentialFileSource::new(
                Arc::clone(&client),
                config.credentials_file,
            ),
            service_account: ServiceAccountSource,
            client,
            accounts,
            secrets,
            notifier: Arc::new(TracingNotifier),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn client(&self) -> &TokenClient {
        &self.client
    }

    pub fn accounts(&self) -> Result<Vec<Account>, AuthError> {
        self.accounts.list()
    }

    /// Returns a usable access token for `account`.
    ///
    /// Nothing is written to the cache unless acquisition succeeds.
    pub async fn access_token(&self, account: &Account) -> Result<String, AuthError> {
        let result = self.acquire(account).await;
        if let Err(err) = &result {
            warn!(
                account = %account.name,
                kind = ?account.kind,
                error = %err,
                "token acquisition failed"
            );
            self.notifier.error(&format!(
                "Could not get an access token for {}: {err}",
                account.name
            ));
        }
        result
    }

    async fn acquire(&self, account: &Account) -> Result<String, AuthError> {
        let source = self.source_for(account.kind);
        if !account.kind.uses_cache() {
            return source.fetch(account).await;
        }

        let lock = self.account_lock(&account.name)?;
        let result = {
            let _guard = lock.lock().await;
            self.acquire_cached(account, source).await
        };
        self.release_lock(&account.name, lock);
        result
    }

    async fn acquire_cached(
        &self,
        account: &Account,
        source: &dyn TokenSource,
    ) -> Result<String, AuthError> {
        let cached = self
            .accounts
            .get(&account.name)?
            .and_then(|record| record.cached_access_token);
        if let TokenStatus::Valid(info) = self.client.validate(cached.as_deref()).await {
            debug!(
                account = %account.name,
                expires_in = info.expires_in,
                "reusing cached access token"
            );
            return Ok(info.token);
        }

        info!(account = %account.name, kind = %account.kind, "generating a new access token");
        let token = source.fetch(account).await?;
        self.accounts.upsert_token(&account.name, account.kind, &token)?;
        Ok(token)
    }

    fn source_for(&self, kind: AccountKind) -> &dyn TokenSource {
        let source: &dyn TokenSource = match kind {
            AccountKind::OAuthSignedIn => &self.signed_in,
            AccountKind::CliDerived => &self.cli,
            AccountKind::PersistentCredentialFile => &self.credential_file,
            AccountKind::ServiceAccountKey => &self.service_account,
        };
        debug_assert_eq!(source.kind(), kind);
        source
    }

    fn account_lock(&self, name: &str) -> Result<Arc<tokio::sync::Mutex<()>>, AuthError> {
        let mut locks = self.locks.lock().map_err(|_| AuthError::AccountStore {
            message: "account lock table poisoned".to_string(),
        })?;
        Ok(Arc::clone(locks.entry(name.to_string()).or_default()))
    }

    /// Drops the table entry once no other caller holds or waits on it.
    fn release_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // One reference in the table, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    /// Runs the browser flow and registers the signed-in account.
    ///
    /// The account is named after the email the provider reports for the
    /// new access token.
    pub async fn sign_in(&self, session: &AuthorizationSession) -> Result<Account, AuthError> {
        let result = self.complete_sign_in(session).await;
        if let Err(err) = &result {
            // Flow failures were already reported by the session.
            if !matches!(
                err,
                AuthError::UserCancelled
                    | AuthError::TimedOut { .. }
                    | AuthError::CsrfMismatch { .. }
                    | AuthError::ProviderDenied { .. }
                    | AuthError::FlowInProgress
            ) {
                self.notifier
                    .error(&format!("Sign in to accounts.google.com failed: {err}"));
            }
        }
        result
    }

    async fn complete_sign_in(&self, session: &AuthorizationSession) -> Result<Account, AuthError> {
        let grant = session.run().await?;
        let record = self.client.exchange_code(&grant).await?;

        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::InvalidResponse {
                message: "token response carried no refresh token".to_string(),
                body: String::new(),
            })?;

        let name = match self.client.validate(Some(&record.access_token)).await {
            TokenStatus::Valid(info) => info.email,
            TokenStatus::Invalid => None,
        }
        .ok_or_else(|| AuthError::InvalidResponse {
            message: "unable to determine the signed-in account's email".to_string(),
            body: String::new(),
        })?;

        self.secrets.store(&name, &refresh_token)?;
        if let Err(err) = self
            .accounts
            .upsert_token(&name, AccountKind::OAuthSignedIn, &record.access_token)
        {
            if let Err(cleanup) = self.secrets.delete(&name) {
                warn!(account = %name, error = %cleanup, "failed to remove refresh token");
            }
            return Err(err);
        }
        info!(account = %name, "signed in");

        Ok(Account::signed_in(name).with_cached_access_token(record.access_token))
    }

    /// Forgets an account: its registry entry and any stored refresh token.
    pub fn sign_out(&self, name: &str) -> Result<(), AuthError> {
        let removed = self.accounts.delete(name)?;
        self.secrets.delete(name)?;
        info!(account = %name, removed, "signed out");
        Ok(())
    }
}
