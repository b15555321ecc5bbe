use std::collections::HashMap;

use ee_connect::{AuthError, LocalServerConfig, LoopbackServer};
use reqwest::{Client, StatusCode, header::LOCATION, redirect::Policy};
use url::Url;

const AUTHORIZE_URL: &str = "https://accounts.example.com/o/oauth2/auth?client_id=cid&response_type=code";

fn http() -> Client {
    Client::builder().redirect(Policy::none()).build().unwrap()
}

fn new_server(config: LocalServerConfig) -> LoopbackServer {
    LoopbackServer::new(Url::parse(AUTHORIZE_URL).unwrap(), config).unwrap()
}

fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn callback_url(port: u16, params: &[(&str, &str)]) -> Url {
    let mut url = Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap();
    url.query_pairs_mut().extend_pairs(params);
    url
}

#[tokio::test]
async fn start_and_stop_guard_their_preconditions() {
    let mut server = new_server(LocalServerConfig::new());
    assert!(matches!(server.stop().await, Err(AuthError::ServerNotRunning)));

    let port = server.start().await.unwrap();
    assert_ne!(port, 0);
    assert_eq!(server.port(), Some(port));
    assert!(server.state().unwrap().contains(&port.to_string()));
    assert!(matches!(
        server.start().await,
        Err(AuthError::ServerAlreadyRunning)
    ));

    server.stop().await.unwrap();
    assert!(!server.is_running());
    assert!(matches!(server.stop().await, Err(AuthError::ServerNotRunning)));
    assert!(http().get(format!("http://127.0.0.1:{port}/")).send().await.is_err());
}

#[tokio::test]
async fn signin_with_foreign_nonce_leaves_result_pending() {
    let mut server = new_server(LocalServerConfig::new());
    let port = server.start().await.unwrap();

    let response = http()
        .get(format!("http://127.0.0.1:{port}/signin?nonce=forged"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("/?error="));
    assert!(!server.settler().is_settled());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn signin_redirects_to_provider_with_loopback_callback() {
    let mut server = new_server(LocalServerConfig::new());
    let port = server.start().await.unwrap();
    let nonce = server.nonce().to_string();

    let response = http()
        .get(server.signin_url().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let target = Url::parse(&location(&response)).unwrap();
    assert_eq!(target.host_str(), Some("accounts.example.com"));
    let pairs: HashMap<_, _> = target.query_pairs().into_owned().collect();
    assert_eq!(pairs.get("client_id"), Some(&"cid".to_string()));
    assert_eq!(
        pairs.get("redirect_uri"),
        Some(&format!("http://127.0.0.1:{port}/callback?nonce={nonce}"))
    );
    assert_eq!(pairs.get("state").map(String::as_str), server.state());
    assert!(!server.settler().is_settled());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn callback_with_matching_state_and_nonce_resolves() {
    let mut server = new_server(LocalServerConfig::new());
    let port = server.start().await.unwrap();
    let state = server.state().unwrap().to_string();
    let nonce = server.nonce().to_string();

    let response = http()
        .get(callback_url(
            port,
            &[("code", "X"), ("state", state.as_str()), ("nonce", nonce.as_str())],
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");

    let result = server.wait_for_oauth_response().await.unwrap();
    assert_eq!(result.code, "X");
    assert_eq!(result.state, state);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn callback_with_foreign_nonce_rejects_and_never_resolves() {
    let mut server = new_server(LocalServerConfig::new());
    let port = server.start().await.unwrap();
    let state = server.state().unwrap().to_string();
    let nonce = server.nonce().to_string();

    let response = http()
        .get(callback_url(
            port,
            &[("code", "X"), ("state", state.as_str()), ("nonce", "forged")],
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("/?error="));

    // A genuine callback afterwards cannot overturn the rejection.
    http()
        .get(callback_url(
            port,
            &[("code", "X"), ("state", state.as_str()), ("nonce", nonce.as_str())],
        ))
        .send()
        .await
        .unwrap();

    let result = server.wait_for_oauth_response().await;
    assert!(matches!(result, Err(AuthError::CsrfMismatch { .. })));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn callback_with_wrong_or_missing_state_is_csrf() {
    for params in [
        vec![("code", "X"), ("state", "port=1;nonce=zzz")],
        vec![("code", "X")],
    ] {
        let mut server = new_server(LocalServerConfig::new());
        let port = server.start().await.unwrap();
        let nonce = server.nonce().to_string();

        let query: Vec<(&str, &str)> = params
            .iter()
            .copied()
            .chain([("nonce", nonce.as_str())])
            .collect();
        http()
            .get(callback_url(port, &query))
            .send()
            .await
            .unwrap();

        let result = server.wait_for_oauth_response().await;
        assert!(matches!(result, Err(AuthError::CsrfMismatch { .. })));
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn callback_without_code_is_provider_denial() {
    let mut server = new_server(LocalServerConfig::new());
    let port = server.start().await.unwrap();
    let state = server.state().unwrap().to_string();
    let nonce = server.nonce().to_string();

    let response = http()
        .get(callback_url(
            port,
            &[("error", "access_denied"), ("state", state.as_str()), ("nonce", nonce.as_str())],
        ))
        .send()
        .await
        .unwrap();
    assert!(location(&response).starts_with("/?error="));

    match server.wait_for_oauth_response().await {
        Err(AuthError::ProviderDenied { reason }) => assert_eq!(reason, "access_denied"),
        other => panic!("expected denial, got {other:?}"),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn serves_confirmation_page_and_static_assets() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<p>custom index</p>").unwrap();
    std::fs::write(root.path().join("style.css"), "body {}").unwrap();

    let mut server = new_server(LocalServerConfig::new().with_serve_root(root.path()));
    let port = server.start().await.unwrap();
    let base = format!("http://127.0.0.1:{port}");

    let index = http().get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.text().await.unwrap(), "<p>custom index</p>");

    let css = http().get(format!("{base}/style.css")).send().await.unwrap();
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.text().await.unwrap(), "body {}");

    let missing = http().get(format!("{base}/missing.js")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let error = http()
        .get(format!("{base}/?error=Nonce+does+not+match."))
        .send()
        .await
        .unwrap();
    assert_eq!(error.status(), StatusCode::BAD_REQUEST);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn builtin_pages_without_serve_root() {
    let mut server = new_server(LocalServerConfig::new().with_success_html("done"));
    let port = server.start().await.unwrap();
    let base = format!("http://127.0.0.1:{port}");

    let index = http().get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.text().await.unwrap(), "done");

    let other = http().get(format!("{base}/favicon.ico")).send().await.unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);

    server.stop().await.unwrap();
}
