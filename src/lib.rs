//! Google Earth Engine sign-in and access-token brokering.
//!
//! A loopback OAuth 2.0 server drives the authorization-code flow in the
//! user's browser; the [`TokenBroker`] hands out short-lived access tokens
//! for signed-in, gcloud, credential-file and service-account identities
//! without exposing the long-lived secrets behind them.

mod account;
mod broker;
mod client;
mod config;
mod error;
mod flow;
mod local_server;
mod pkce;
mod sources;
mod store;
mod types;

pub use account::{APPLICATION_DEFAULT, Account, AccountKind, PERSISTENT_CREDENTIALS};
pub use broker::TokenBroker;
pub use client::{CredentialPayload, TokenClient};
pub use config::{BrokerConfig, ProviderConfig, default_accounts_file, default_credentials_file};
pub use error::AuthError;
#[cfg(feature = "browser")]
pub use flow::SystemBrowser;
pub use flow::{
    AuthorizationSession, BrowserOpener, DEFAULT_FLOW_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, FlowConfig,
    FlowState, Notifier, TracingNotifier,
};
pub use local_server::{LocalServerConfig, LoopbackServer, Settler};
pub use pkce::PkcePair;
pub use sources::{
    CliTokenSource, CredentialFileSource, RefreshTokenSource, ServiceAccountSource, TokenSource,
};
#[cfg(feature = "keyring")]
pub use store::KeyringSecretStore;
pub use store::{
    AccountRecord, AccountStore, FileAccountStore, MemoryAccountStore, MemorySecretStore,
    SecretStore,
};
pub use types::{AuthorizationGrant, OAuthResult, TokenInfo, TokenRecord, TokenStatus};
