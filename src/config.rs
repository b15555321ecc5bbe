use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use url::Url;

use crate::{AuthError, PkcePair};

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

const DEFAULT_CLIENT_ID: &str =
    "517222506229-vsmmajv00ul0bs7p89v5m89qs8eb9359.apps.googleusercontent.com";
const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/earthengine",
    "https://www.googleapis.com/auth/devstorage.full_control",
];

const DEFAULT_CLI_PROGRAM: &str = "gcloud";
const ACCOUNTS_FILE: &str = "accounts.json";

/// Client registration and endpoints of the identity provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub tokeninfo_url: String,
    pub scopes: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            tokeninfo_url: TOKENINFO_URL.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            timeout: None,
        }
    }
}

impl ProviderConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_tokeninfo_url(mut self, url: impl Into<String>) -> Self {
        self.tokeninfo_url = url.into();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Authorization endpoint URL without `redirect_uri` and `state`; the
    /// loopback server adds both once its port is known.
    pub fn authorization_url(&self, pkce: &PkcePair) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scope())
            .append_pair("access_type", "offline")
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("tokeninfo_url", &self.tokeninfo_url)
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Local inputs of the token sources.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub cli_program: String,
    pub credentials_file: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cli_program: DEFAULT_CLI_PROGRAM.to_string(),
            credentials_file: default_credentials_file()
                .unwrap_or_else(|| PathBuf::from(".config/earthengine/credentials")),
        }
    }
}

impl BrokerConfig {
    pub fn with_cli_program(mut self, program: impl Into<String>) -> Self {
        self.cli_program = program.into();
        self
    }

    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = path.into();
        self
    }
}

/// `~/.config/earthengine/credentials`, written by the Python client's
/// `earthengine authenticate`.
pub fn default_credentials_file() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("earthengine")
            .join("credentials")
    })
}

pub fn default_accounts_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ee-connect").map(|dirs| dirs.config_dir().join(ACCOUNTS_FILE))
}
