use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use ee_connect::{
    AuthError, AuthorizationSession, BrowserOpener, FlowConfig, FlowState, LocalServerConfig,
    ProviderConfig,
};
use reqwest::{Client, header::LOCATION, redirect::Policy};
use tokio::sync::mpsc;
use url::Url;

const GRACE: Duration = Duration::from_millis(250);

/// Hands every URL the flow opens to the test instead of a browser.
struct CapturingBrowser {
    opened: mpsc::UnboundedSender<String>,
}

impl BrowserOpener for CapturingBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        let _ = self.opened.send(url.to_string());
        Ok(())
    }
}

fn session(timeout: Duration) -> (Arc<AuthorizationSession>, mpsc::UnboundedReceiver<String>) {
    session_with(
        FlowConfig::default()
            .with_timeout(timeout)
            .with_shutdown_grace(GRACE),
    )
}

fn session_with(
    config: FlowConfig,
) -> (Arc<AuthorizationSession>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let provider = ProviderConfig::new("client-id")
        .with_authorize_url("https://accounts.example.com/o/oauth2/auth");
    let session = AuthorizationSession::new(
        provider,
        config,
        Arc::new(CapturingBrowser { opened: tx }),
    );
    (Arc::new(session), rx)
}

fn port_of(url: &str) -> u16 {
    Url::parse(url).unwrap().port().unwrap()
}

/// Plays the browser: follows `/signin` to the provider, then returns to
/// the loopback callback with `code`. Returns the `redirect_uri` the
/// provider was given.
async fn complete_in_browser(signin_url: &str, code: &str) -> String {
    let http = Client::builder().redirect(Policy::none()).build().unwrap();
    let response = http.get(signin_url).send().await.unwrap();
    let provider_url = Url::parse(response.headers()[LOCATION].to_str().unwrap()).unwrap();
    let params: HashMap<_, _> = provider_url.query_pairs().into_owned().collect();

    let mut callback = Url::parse(&params["redirect_uri"]).unwrap();
    callback
        .query_pairs_mut()
        .append_pair("code", code)
        .append_pair("state", &params["state"]);
    let response = http.get(callback).send().await.unwrap();
    assert_eq!(response.headers()[LOCATION], "/");
    params["redirect_uri"].clone()
}

async fn assert_port_closed(port: u16) {
    assert_closed(&format!("http://127.0.0.1:{port}/")).await;
}

async fn assert_closed(url: &str) {
    let http = Client::new();
    assert!(
        http.get(url)
            .send()
            .await
            .is_err()
    );
}

#[tokio::test]
async fn callback_resolves_flow_with_code_and_bound_port() {
    let (session, mut opened) = session(Duration::from_secs(30));
    let flow = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    let signin_url = opened.recv().await.unwrap();
    let port = port_of(&signin_url);
    assert_eq!(session.state(), FlowState::AwaitingCallback);
    let sent_redirect_uri = complete_in_browser(&signin_url, "X").await;

    let grant = flow.await.unwrap().unwrap();
    assert_eq!(grant.code, "X");
    assert_eq!(grant.port, port);
    assert!(signin_url.ends_with(&format!("nonce={}", grant.nonce)));
    assert_eq!(
        grant.redirect_uri(),
        format!("http://127.0.0.1:{port}/callback?nonce={}", grant.nonce)
    );
    assert!(!grant.code_verifier.is_empty());
    assert_eq!(grant.redirect_uri(), sent_redirect_uri);

    tokio::time::sleep(GRACE * 4).await;
    assert_eq!(session.state(), FlowState::Idle);
    assert_port_closed(port).await;
}

#[tokio::test]
async fn user_cancellation_rejects_and_stops_server() {
    let (session, mut opened) = session(Duration::from_secs(30));
    let flow = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    let signin_url = opened.recv().await.unwrap();
    let port = port_of(&signin_url);
    session.cancel();

    let result = flow.await.unwrap();
    assert!(matches!(result, Err(AuthError::UserCancelled)));
    assert_eq!(session.state(), FlowState::Stopping);

    tokio::time::sleep(GRACE * 4).await;
    assert_eq!(session.state(), FlowState::Idle);
    assert_port_closed(port).await;
}

#[tokio::test]
async fn flow_times_out() {
    let timeout = Duration::from_millis(100);
    let (session, mut opened) = session(timeout);

    let result = session.run().await;
    match result {
        Err(AuthError::TimedOut { timeout: reported }) => assert_eq!(reported, timeout),
        other => panic!("expected timeout, got {other:?}"),
    }

    let port = port_of(&opened.recv().await.unwrap());
    tokio::time::sleep(GRACE * 4).await;
    assert_port_closed(port).await;
}

#[tokio::test]
async fn cancellation_after_resolution_is_ignored() {
    let (session, mut opened) = session(Duration::from_secs(30));
    let flow = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    let signin_url = opened.recv().await.unwrap();
    complete_in_browser(&signin_url, "first").await;
    let grant = flow.await.unwrap().unwrap();
    session.cancel();

    assert_eq!(grant.code, "first");
}

#[tokio::test]
async fn only_one_flow_runs_per_session() {
    let (session, mut opened) = session(Duration::from_secs(30));
    let flow = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    opened.recv().await.unwrap();
    assert!(session.is_in_flight());
    assert!(matches!(
        session.run().await,
        Err(AuthError::FlowInProgress)
    ));

    session.cancel();
    assert!(matches!(
        flow.await.unwrap(),
        Err(AuthError::UserCancelled)
    ));
    assert!(!session.is_in_flight());
}

#[tokio::test]
async fn exchange_redirect_uri_matches_configured_host() {
    let host = IpAddr::V6(Ipv6Addr::LOCALHOST);
    let (session, mut opened) = session_with(
        FlowConfig::default()
            .with_shutdown_grace(GRACE)
            .with_server_config(LocalServerConfig {
                host,
                ..LocalServerConfig::default()
            }),
    );
    let flow = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    let signin_url = opened.recv().await.unwrap();
    assert!(signin_url.starts_with("http://[::1]:"));
    let sent_redirect_uri = complete_in_browser(&signin_url, "X").await;

    let grant = flow.await.unwrap().unwrap();
    assert_eq!(grant.host, host);
    assert_eq!(grant.redirect_uri(), sent_redirect_uri);
    assert!(sent_redirect_uri.starts_with("http://[::1]:"));
}

#[tokio::test]
async fn earlier_shutdown_does_not_idle_a_later_run() {
    let grace = Duration::from_secs(1);
    let (session, mut opened) = session_with(FlowConfig::default().with_shutdown_grace(grace));

    let cancel_run = |session: Arc<AuthorizationSession>| async move {
        let flow = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.run().await }
        });
        wait_until_awaiting_callback(&session).await;
        session.cancel();
        assert!(matches!(flow.await.unwrap(), Err(AuthError::UserCancelled)));
    };

    cancel_run(Arc::clone(&session)).await;
    let first_url = opened.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    cancel_run(Arc::clone(&session)).await;
    let second_url = opened.recv().await.unwrap();
    assert_eq!(session.state(), FlowState::Stopping);

    // First run's shutdown has fired; the second run's has not.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(session.state(), FlowState::Stopping);
    assert_closed(&first_url).await;
    let http = Client::builder().redirect(Policy::none()).build().unwrap();
    assert!(http.get(&second_url).send().await.is_ok());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(session.state(), FlowState::Idle);
    assert_closed(&second_url).await;
}

/// Waits until the session's server is up and awaiting the browser.
async fn wait_until_awaiting_callback(session: &AuthorizationSession) {
    while session.state() != FlowState::AwaitingCallback {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
