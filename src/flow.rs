//! One end-to-end authorization attempt against the provider.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    AuthError, AuthorizationGrant, LocalServerConfig, LoopbackServer, PkcePair, ProviderConfig,
};

pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const PROGRESS_TITLE: &str = "Signing in to accounts.google.com";

/// Opens a URL in the user's browser.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), AuthError>;
}

#[cfg(feature = "browser")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[cfg(feature = "browser")]
impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        webbrowser::open(url).map_err(AuthError::from)
    }
}

/// User-facing progress and failure messages.
pub trait Notifier: Send + Sync {
    fn progress(&self, _title: &str) {}

    fn finished(&self) {}

    fn error(&self, message: &str);
}

/// Routes notifications to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn progress(&self, title: &str) {
        info!("{title}");
    }

    fn error(&self, message: &str) {
        warn!("{message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ServerStarting,
    AwaitingCallback,
    Resolved,
    Rejected,
    TimedOut,
    Cancelled,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub timeout: Duration,
    /// Delay before the server stops, so the browser's last redirect lands.
    pub shutdown_grace: Duration,
    pub server: LocalServerConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FLOW_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            server: LocalServerConfig::default(),
        }
    }
}

impl FlowConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_server_config(mut self, server: LocalServerConfig) -> Self {
        self.server = server;
        self
    }
}

/// Caller-owned sign-in session.
///
/// Only one flow runs per session at a time; `cancel` aborts the flow that
/// is currently waiting for the browser.
pub struct AuthorizationSession {
    provider: ProviderConfig,
    config: FlowConfig,
    browser: Arc<dyn BrowserOpener>,
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<FlowState>>,
    /// Bumped per run; a delayed shutdown only resets the state of its own run.
    generation: Arc<AtomicU64>,
    in_flight: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl AuthorizationSession {
    pub fn new(
        provider: ProviderConfig,
        config: FlowConfig,
        browser: Arc<dyn BrowserOpener>,
    ) -> Self {
        Self {
            provider,
            config,
            browser,
            notifier: Arc::new(TracingNotifier),
            state: Arc::new(Mutex::new(FlowState::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn state(&self) -> FlowState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(FlowState::Idle)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// User-triggered cancellation of the running flow.
    pub fn cancel(&self) {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
    }

    pub async fn run(&self) -> Result<AuthorizationGrant, AuthError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(AuthError::FlowInProgress);
        }
        let _in_flight = InFlight(&self.in_flight);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let cancel = CancellationToken::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = cancel.clone();
        }

        self.notifier.progress(PROGRESS_TITLE);
        let result = self.authorize(cancel, generation).await;
        self.notifier.finished();
        if let Err(err) = &result {
            self.notifier
                .error(&format!("Sign in to accounts.google.com failed: {err}"));
        }
        result
    }

    async fn authorize(
        &self,
        cancel: CancellationToken,
        generation: u64,
    ) -> Result<AuthorizationGrant, AuthError> {
        let pkce = PkcePair::generate()?;
        let authorize_url = self.provider.authorization_url(&pkce)?;

        self.transition(FlowState::ServerStarting);
        let mut server = LoopbackServer::new(authorize_url, self.config.server.clone())?;
        let port = match server.start().await {
            Ok(port) => port,
            Err(err) => {
                self.transition(FlowState::Stopping);
                self.transition(FlowState::Idle);
                return Err(err);
            }
        };
        let nonce = server.nonce().to_string();

        self.transition(FlowState::AwaitingCallback);
        let timer = {
            let settler = server.settler();
            let timeout = self.config.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                settler.settle(Err(AuthError::TimedOut { timeout }));
            })
        };
        let canceller = {
            let settler = server.settler();
            tokio::spawn(async move {
                cancel.cancelled().await;
                settler.settle(Err(AuthError::UserCancelled));
            })
        };

        if let Some(signin_url) = server.signin_url() {
            info!(port, "opening browser for sign in");
            if let Err(err) = self.browser.open(&signin_url) {
                self.notifier.error(&format!(
                    "Failed to open a browser ({err}); open {signin_url} to continue"
                ));
            }
        }

        let outcome = server.wait_for_oauth_response().await;
        timer.abort();
        canceller.abort();

        self.transition(match &outcome {
            Ok(_) => FlowState::Resolved,
            Err(AuthError::TimedOut { .. }) => FlowState::TimedOut,
            Err(AuthError::UserCancelled) => FlowState::Cancelled,
            Err(_) => FlowState::Rejected,
        });
        self.schedule_shutdown(server, generation);

        let response = outcome?;
        Ok(AuthorizationGrant {
            code: response.code,
            host: self.config.server.host,
            port,
            nonce,
            code_verifier: pkce.code_verifier,
        })
    }

    fn schedule_shutdown(&self, mut server: LoopbackServer, generation: u64) {
        self.transition(FlowState::Stopping);
        let grace = self.config.shutdown_grace;
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(err) = server.stop().await {
                warn!(error = %err, "failed to stop loopback server");
            }
            if let Ok(mut state) = state.lock() {
                if *state == FlowState::Stopping && current.load(Ordering::SeqCst) == generation {
                    *state = FlowState::Idle;
                }
            }
        });
    }

    fn transition(&self, next: FlowState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "authorization flow transition");
            *state = next;
        }
    }
}

impl fmt::Debug for AuthorizationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSession")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
