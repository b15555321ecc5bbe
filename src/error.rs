use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user cancelled the sign in")]
    UserCancelled,

    #[error("sign in timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("csrf check failed: {reason}")]
    CsrfMismatch { reason: String },

    #[error("authorization denied: {reason}")]
    ProviderDenied { reason: String },

    #[error("token exchange failed (http {status}): {body}")]
    ExchangeFailed { status: u16, body: String },

    #[error("`{program}` is not available: {message}")]
    CliUnavailable { program: String, message: String },

    #[error("`{command}` failed: {stderr}")]
    CliExecutionFailed { command: String, stderr: String },

    #[error("credential file {} is unreadable: {message}", path.display())]
    CredentialFileUnreadable { path: PathBuf, message: String },

    #[error("no refresh token stored for {account}")]
    MissingRefreshToken { account: String },

    #[error("no service account key supplied for {account}")]
    MissingServiceAccountKey { account: String },

    #[error("an authorization flow is already in progress")]
    FlowInProgress,

    #[error("loopback server is already running")]
    ServerAlreadyRunning,

    #[error("loopback server is not running")]
    ServerNotRunning,

    #[error("secret store error: {message}")]
    SecretStore { message: String },

    #[error("account store error: {message}")]
    AccountStore { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {message}")]
    InvalidResponse { message: String, body: String },
}
