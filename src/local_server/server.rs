use std::time::Duration;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, warn};
use url::Url;

use crate::{AuthError, OAuthResult, pkce::generate_nonce};

use super::config::LocalServerConfig;
use super::http::{
    LoopbackState, ResponseReceiver, Settler, callback_handler, fallback_handler, index_handler,
    signin_handler, wait_for_response,
};
use super::target::LoopbackTarget;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    target: LoopbackTarget,
    state: String,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Loopback HTTP listener for one authorization attempt.
///
/// The nonce is fixed at construction and the pending result settles at
/// most once, so a server instance serves exactly one attempt.
pub struct LoopbackServer {
    config: LocalServerConfig,
    authorize_url: Url,
    nonce: String,
    settler: Settler,
    response_rx: Option<ResponseReceiver>,
    running: Option<Running>,
}

impl LoopbackServer {
    /// `authorize_url` is the provider endpoint with client parameters set;
    /// `redirect_uri` and `state` are appended on `/signin`.
    pub fn new(authorize_url: Url, config: LocalServerConfig) -> Result<Self, AuthError> {
        let (settler, response_rx) = Settler::channel();
        Ok(Self {
            config,
            authorize_url,
            nonce: generate_nonce()?,
            settler,
            response_rx: Some(response_rx),
            running: None,
        })
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.target.port)
    }

    pub fn state(&self) -> Option<&str> {
        self.running.as_ref().map(|running| running.state.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn settler(&self) -> Settler {
        self.settler.clone()
    }

    /// Local URL the browser should open to begin the flow.
    pub fn signin_url(&self) -> Option<String> {
        self.running
            .as_ref()
            .map(|running| running.target.signin_url(&self.nonce))
    }

    /// Binds an OS-assigned port on the loopback interface and starts serving.
    pub async fn start(&mut self) -> Result<u16, AuthError> {
        if self.running.is_some() {
            return Err(AuthError::ServerAlreadyRunning);
        }

        let listener = TcpListener::bind((self.config.host, 0)).await?;
        let port = listener.local_addr()?.port();
        let target = LoopbackTarget::new(self.config.host, port);
        let state = target.derive_state(&self.nonce);

        let shared = LoopbackState {
            target: target.clone(),
            nonce: self.nonce.clone(),
            state: state.clone(),
            authorize_url: self.authorize_url.clone(),
            serve_root: self.config.serve_root.clone(),
            success_html: self.config.success_html.clone(),
            error_html: self.config.error_html.clone(),
            settler: self.settler.clone(),
        };

        let router = Router::new()
            .route("/signin", get(signin_handler))
            .route("/callback", get(callback_handler))
            .route("/", get(index_handler));
        let router = match &self.config.serve_root {
            Some(root) => router.fallback_service(ServeDir::new(root)),
            None => router.fallback(fallback_handler),
        };
        let app = router.with_state(shared);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let settler = self.settler.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                settler.settle(Err(AuthError::InvalidResponse {
                    message: err.to_string(),
                    body: String::new(),
                }));
            }
        });

        debug!(port, "loopback server listening");
        self.running = Some(Running {
            target,
            state,
            shutdown_tx,
            handle,
        });
        Ok(port)
    }

    /// Resolves with the first settlement of this server's pending result.
    pub async fn wait_for_oauth_response(&mut self) -> Result<OAuthResult, AuthError> {
        let response_rx = self
            .response_rx
            .take()
            .ok_or_else(|| AuthError::InvalidResponse {
                message: "oauth response already awaited".to_string(),
                body: String::new(),
            })?;
        wait_for_response(response_rx).await
    }

    pub async fn stop(&mut self) -> Result<(), AuthError> {
        let Running {
            target,
            shutdown_tx,
            mut handle,
            ..
        } = self.running.take().ok_or(AuthError::ServerNotRunning)?;

        let _ = shutdown_tx.send(());
        if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            warn!(
                port = target.port,
                "loopback server did not drain in time; aborting"
            );
            handle.abort();
        }
        debug!(port = target.port, "loopback server stopped");
        Ok(())
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}
