use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::{AuthError, AuthorizationGrant, ProviderConfig, TokenInfo, TokenRecord, TokenStatus};

/// Input to the provider's token endpoint.
pub enum CredentialPayload {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
    },
    /// Contents of the persistent credential file. Carries its own client
    /// registration and is sent as a refresh-token grant.
    CredentialFile(Map<String, Value>),
}

impl CredentialPayload {
    fn grant_type(&self) -> &'static str {
        match self {
            CredentialPayload::AuthorizationCode { .. } => "authorization_code",
            CredentialPayload::RefreshToken { .. } | CredentialPayload::CredentialFile(_) => {
                "refresh_token"
            }
        }
    }
}

/// Talks to the provider's token and introspection endpoints.
#[derive(Debug, Clone)]
pub struct TokenClient {
    config: ProviderConfig,
    http: Client,
}

impl TokenClient {
    pub fn new(config: ProviderConfig) -> Result<Self, AuthError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { config, http })
    }

    pub fn with_http_client(config: ProviderConfig, http: Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub async fn exchange_code(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<TokenRecord, AuthError> {
        self.exchange(CredentialPayload::AuthorizationCode {
            code: grant.code.clone(),
            redirect_uri: grant.redirect_uri(),
            code_verifier: Some(grant.code_verifier.clone()),
        })
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, AuthError> {
        self.exchange(CredentialPayload::RefreshToken {
            refresh_token: refresh_token.to_string(),
        })
        .await
    }

    /// POSTs the payload as JSON. Anything but 200 fails with the raw body.
    pub async fn exchange(&self, payload: CredentialPayload) -> Result<TokenRecord, AuthError> {
        let grant_type = payload.grant_type();
        let mut body = match payload {
            CredentialPayload::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                let mut body = self.client_credentials();
                body.insert("code".to_string(), Value::String(code));
                body.insert("redirect_uri".to_string(), Value::String(redirect_uri));
                if let Some(verifier) = code_verifier {
                    body.insert("code_verifier".to_string(), Value::String(verifier));
                }
                body
            }
            CredentialPayload::RefreshToken { refresh_token } => {
                let mut body = self.client_credentials();
                body.insert("refresh_token".to_string(), Value::String(refresh_token));
                body
            }
            CredentialPayload::CredentialFile(contents) => contents,
        };
        body.insert(
            "grant_type".to_string(),
            Value::String(grant_type.to_string()),
        );

        debug!(grant_type, "requesting access token");
        let response = self
            .http
            .post(&self.config.token_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status != reqwest::StatusCode::OK {
            return Err(AuthError::ExchangeFailed {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|err| AuthError::InvalidResponse {
            message: err.to_string(),
            body: text,
        })
    }

    /// Introspects `token`. Invalidity, including transport failure, is a
    /// verdict rather than an error.
    pub async fn validate(&self, token: Option<&str>) -> TokenStatus {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return TokenStatus::Invalid;
        };

        let mut url = match Url::parse(&self.config.tokeninfo_url) {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "invalid tokeninfo url");
                return TokenStatus::Invalid;
            }
        };
        url.query_pairs_mut().append_pair("access_token", token);

        let body = match self.fetch_json(url).await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "token introspection failed");
                return TokenStatus::Invalid;
            }
        };

        match TokenInfo::from_introspection(token, body) {
            Some(info) => TokenStatus::Valid(info),
            None => TokenStatus::Invalid,
        }
    }

    async fn fetch_json(&self, url: Url) -> Result<Value, AuthError> {
        let text = self.http.get(url).send().await?.text().await?;
        serde_json::from_str(&text).map_err(|err| AuthError::InvalidResponse {
            message: err.to_string(),
            body: text,
        })
    }

    fn client_credentials(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(
            "client_id".to_string(),
            Value::String(self.config.client_id.clone()),
        );
        if let Some(secret) = &self.config.client_secret {
            body.insert("client_secret".to_string(), Value::String(secret.clone()));
        }
        body
    }
}
