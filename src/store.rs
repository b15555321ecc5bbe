//! Persisted account registry and the separate refresh-token vault.
//!
//! Refresh tokens never share a store with account metadata: the
//! [`AccountStore`] holds `name -> {kind, cached access token}` and the
//! [`SecretStore`] holds `name -> refresh token`.

mod accounts;
mod secrets;

pub use accounts::{AccountRecord, AccountStore, FileAccountStore, MemoryAccountStore};
#[cfg(feature = "keyring")]
pub use secrets::KeyringSecretStore;
pub use secrets::{MemorySecretStore, SecretStore};
