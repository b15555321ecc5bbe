use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

use crate::{AuthError, OAuthResult};

use super::target::LoopbackTarget;

type ResponseResult = Result<OAuthResult, AuthError>;
type ResponseSender = oneshot::Sender<ResponseResult>;
pub(super) type ResponseReceiver = oneshot::Receiver<ResponseResult>;

/// Single-fire handle on a server's pending result.
///
/// Route handlers, the flow timeout and user cancellation all hold a clone;
/// the first `settle` wins and every later call is a no-op.
#[derive(Clone)]
pub struct Settler {
    tx: Arc<Mutex<Option<ResponseSender>>>,
}

impl Settler {
    pub(super) fn channel() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Returns `false` when the result was already settled.
    pub fn settle(&self, result: Result<OAuthResult, AuthError>) -> bool {
        let Ok(mut guard) = self.tx.lock() else {
            return false;
        };
        match guard.take() {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[derive(Clone)]
pub(super) struct LoopbackState {
    pub(super) target: LoopbackTarget,
    pub(super) nonce: String,
    pub(super) state: String,
    pub(super) authorize_url: Url,
    pub(super) serve_root: Option<PathBuf>,
    pub(super) success_html: String,
    pub(super) error_html: String,
    pub(super) settler: Settler,
}

#[derive(Debug, Deserialize)]
pub(super) struct SigninQuery {
    nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct IndexQuery {
    error: Option<String>,
}

pub(super) async fn signin_handler(
    State(state): State<LoopbackState>,
    Query(query): Query<SigninQuery>,
) -> Response {
    if query.nonce.as_deref() != Some(state.nonce.as_str()) {
        warn!("signin request with a foreign nonce");
        return found(&error_location("Nonce does not match."));
    }

    let mut url = state.authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("redirect_uri", &state.target.callback_uri(&state.nonce))
        .append_pair("state", &state.state);

    debug!(port = state.target.port, "redirecting browser to provider");
    found(url.as_str())
}

pub(super) async fn callback_handler(
    State(state): State<LoopbackState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let CallbackQuery {
        code,
        state: returned_state,
        nonce,
        error,
    } = query;

    let Some(code) = code.filter(|code| !code.is_empty()) else {
        let reason = error.unwrap_or_else(|| "User cancelled the authorization.".to_string());
        warn!(%reason, "provider returned no authorization code");
        state.settler.settle(Err(AuthError::ProviderDenied {
            reason: reason.clone(),
        }));
        return found(&error_location(&reason));
    };

    let (Some(returned_state), Some(nonce)) = (returned_state, nonce) else {
        return reject_csrf(&state.settler, "No state or nonce in response!");
    };
    if returned_state != state.state {
        return reject_csrf(&state.settler, "State does not match.");
    }
    if nonce != state.nonce {
        return reject_csrf(&state.settler, "Nonce does not match.");
    }

    debug!("authorization code received");
    state.settler.settle(Ok(OAuthResult {
        code,
        state: returned_state,
    }));
    found("/")
}

pub(super) async fn index_handler(
    State(state): State<LoopbackState>,
    Query(query): Query<IndexQuery>,
) -> Response {
    if query.error.is_some() {
        return (StatusCode::BAD_REQUEST, Html(state.error_html)).into_response();
    }

    if let Some(root) = &state.serve_root {
        match tokio::fs::read_to_string(root.join("index.html")).await {
            Ok(body) => return (StatusCode::OK, Html(body)).into_response(),
            Err(err) => debug!(error = %err, "no index.html under serve root"),
        }
    }

    (StatusCode::OK, Html(state.success_html)).into_response()
}

pub(super) async fn fallback_handler(State(state): State<LoopbackState>) -> Response {
    (StatusCode::NOT_FOUND, Html(state.error_html)).into_response()
}

pub(super) async fn wait_for_response(
    response_rx: ResponseReceiver,
) -> Result<OAuthResult, AuthError> {
    response_rx.await.map_err(|_| AuthError::InvalidResponse {
        message: "loopback server response channel closed".to_string(),
        body: String::new(),
    })?
}

fn reject_csrf(settler: &Settler, reason: &str) -> Response {
    warn!(reason, "rejecting loopback callback");
    settler.settle(Err(AuthError::CsrfMismatch {
        reason: reason.to_string(),
    }));
    found(&error_location(reason))
}

fn error_location(message: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("/?error={encoded}")
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
