// All functions in this module are shared test helpers. Not every test
// binary uses every helper, so dead_code warnings are suppressed here.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use posegrid_api::config::ServerConfig;
use posegrid_api::router::build_app_router;
use posegrid_api::state::AppState;
use posegrid_dispatcher::Dispatcher;
use posegrid_store::MemoryStore;

/// Everything a test needs: the router, the backing store, and the temp
/// dirs that must outlive the test body.
pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub data: TempDir,
    pub scripts: TempDir,
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Build the full application router over an in-memory store, with one
/// render script on disk so submissions validate. Uses [`build_app_router`]
/// so tests exercise the same middleware stack as production.
pub fn build_test_app() -> TestApp {
    let data = tempfile::tempdir().unwrap();
    let scripts = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(scripts.path().join("rendering")).unwrap();
    std::fs::write(scripts.path().join("rendering/multi_angle.py"), b"print(1)").unwrap();

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), data.path(), scripts.path())
            .with_poll_interval(Duration::from_millis(10)),
    );

    let config = test_config();
    let state = AppState {
        dispatcher,
        config: Arc::new(config.clone()),
    };

    TestApp {
        app: build_app_router(state, &config),
        store,
        data,
        scripts,
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP test helpers
// ---------------------------------------------------------------------------

/// Collect the response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Send a GET request.
pub async fn get(app: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a JSON request with the given HTTP method.
pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with an empty body.
pub async fn post_empty(app: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}
