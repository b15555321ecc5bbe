use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::local_server::callback_uri;

/// Query parameters accepted by the loopback `/callback` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthResult {
    pub code: String,
    pub state: String,
}

/// Outcome of a successful authorization flow.
///
/// The token exchange must present the same redirect URI that the browser
/// was sent back to, so the grant keeps everything needed to rebuild it.
#[derive(Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub host: IpAddr,
    pub port: u16,
    pub nonce: String,
    pub code_verifier: String,
}

impl AuthorizationGrant {
    pub fn redirect_uri(&self) -> String {
        callback_uri(self.host, self.port, &self.nonce)
    }
}

impl fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("code", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Introspection result for a token that is still usable.
#[derive(Clone)]
pub struct TokenInfo {
    pub token: String,
    pub expires_in: u64,
    pub scope: Option<String>,
    pub email: Option<String>,
    pub access_type: Option<String>,
    pub extra: HashMap<String, Value>,
}

impl TokenInfo {
    /// Builds a record from a tokeninfo response body.
    ///
    /// Returns `None` when the body reports an error or carries no usable
    /// `expires_in`, which may arrive as a number or a numeric string.
    pub(crate) fn from_introspection(token: &str, body: Value) -> Option<Self> {
        let Value::Object(mut fields) = body else {
            return None;
        };
        if fields.contains_key("error") {
            return None;
        }

        let expires_in = match fields.remove("expires_in")? {
            Value::Number(number) => number.as_u64()?,
            Value::String(text) => text.trim().parse().ok()?,
            _ => return None,
        };

        let mut take_string = |key: &str| match fields.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        };
        let scope = take_string("scope");
        let email = take_string("email");
        let access_type = take_string("access_type");

        Some(Self {
            token: token.to_string(),
            expires_in,
            scope,
            email,
            access_type,
            extra: fields.into_iter().collect(),
        })
    }
}

impl fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInfo")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("email", &self.email)
            .field("access_type", &self.access_type)
            .finish_non_exhaustive()
    }
}

/// Introspection verdict. An unusable token is an expected outcome, not an error.
#[derive(Debug, Clone)]
pub enum TokenStatus {
    Valid(TokenInfo),
    Invalid,
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid(_))
    }
}
