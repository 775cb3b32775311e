//! End-to-end coverage of the HTTP+WebSocket surface via `axum-test`.
//!
//! The auth/routing tests below need no database: they return before the
//! handler ever touches the pool. The query/health/websocket tests need a
//! reachable PostgreSQL instance, addressed the same way as the pool's own
//! integration tests, via `PGPOOL_TEST_DSN`.

use std::{sync::Arc, time::Duration};

use axum_test::TestServer;
use proxy_server::{
    auth::ReplayGuard, config::Config, metrics::ServerMetrics, shutdown::ShutdownCoordinator,
    AppState,
};
use telemetry::metrics::Telemetry;

const SECRET: &str = "test-shared-secret";

async fn unstarted_state() -> AppState {
    let pool = pg_pool::ConnectionPool::new(
        "host=localhost user=postgres".to_string(),
        pg_pool::PoolConfig::default(),
    )
    .expect("pool config is valid");

    test_state(pool).await
}

async fn test_state(pool: Arc<pg_pool::ConnectionPool>) -> AppState {
    let config = Arc::new(Config {
        proxy_service_port: 0,
        database_url: String::new(),
        proxy_auth_secret: SECRET.to_string(),
        rust_log: "info".to_string(),
        log_format: String::new(),
        health_check_path: None,
        token_replay_window_secs: 60,
    });

    let metrics = ServerMetrics::new_with_random_prefix().expect("metrics registration succeeds");
    let telemetry = Telemetry::new(Some(metrics)).await.expect("telemetry builds");
    let shutdown = Arc::new(ShutdownCoordinator::new(pool.clone()));

    AppState {
        pool,
        auth: Arc::new(ReplayGuard::new(SECRET.as_bytes().to_vec(), Duration::from_secs(60))),
        config,
        telemetry,
        shutdown,
    }
}

fn token() -> String {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    token_auth::generate(SECRET.as_bytes(), now_ms)
}

async fn server() -> TestServer {
    TestServer::new(proxy_server::app(unstarted_state().await)).expect("router builds")
}

#[tokio::test]
async fn rejects_missing_auth() {
    let response = server().await.get("/").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rejects_invalid_token() {
    let response = server().await.get("/").add_query_param("auth", "not-a-real-token").await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rejects_replayed_token() {
    let server = server().await;
    let token = token();

    // The pool is unstarted, so the authenticated GET itself 500s on
    // acquire, but the *second* presentation of the same token must be
    // rejected for replay before acquire is ever attempted again.
    let first = server.get("/").add_query_param("auth", &token).await;
    first.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);

    let second = server.get("/").add_query_param("auth", &token).await;
    second.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let response = server()
        .await
        .get("/nonexistent")
        .add_query_param("auth", &token())
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_method_is_rejected() {
    let response = server().await.delete("/").add_query_param("auth", &token()).await;
    response.assert_status(axum::http::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn non_json_post_is_rejected() {
    let response = server()
        .await
        .post("/")
        .add_query_param("auth", &token())
        .text("not json")
        .await;
    response.assert_status(axum::http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn metrics_endpoint_requires_auth() {
    let response = server().await.get("/metrics").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

fn test_dsn() -> Option<String> {
    std::env::var("PGPOOL_TEST_DSN").ok()
}

async fn live_state() -> Option<AppState> {
    let dsn = test_dsn()?;
    let pool = pg_pool::ConnectionPool::new(dsn, pg_pool::PoolConfig::default())
        .expect("pool config is valid");
    pool.start().await.expect("pool starts against a reachable database");
    Some(test_state(pool).await)
}

#[tokio::test]
async fn runs_a_query_end_to_end() {
    let Some(state) = live_state().await else {
        eprintln!("skipping: PGPOOL_TEST_DSN not set");
        return;
    };
    let token = token();
    let server = TestServer::new(proxy_server::app(state)).unwrap();

    let response = server
        .post("/")
        .add_query_param("auth", &token)
        .json(&serde_json::json!({
            "id": "req-1",
            "query": "SELECT $1::int AS value",
            "params": ["42"],
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], "req-1");
    assert_eq!(body["rowCount"], 1);
}

#[tokio::test]
async fn invalid_sql_reports_failure_without_error_status() {
    let Some(state) = live_state().await else {
        eprintln!("skipping: PGPOOL_TEST_DSN not set");
        return;
    };
    let token = token();
    let server = TestServer::new(proxy_server::app(state)).unwrap();

    let response = server
        .post("/")
        .add_query_param("auth", &token)
        .json(&serde_json::json!({
            "id": "req-bad",
            "query": "SELECT * FROM no_such_table_at_all",
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], "req-bad");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn health_check_reports_pool_stats() {
    let Some(state) = live_state().await else {
        eprintln!("skipping: PGPOOL_TEST_DSN not set");
        return;
    };
    let token = token();
    let server = TestServer::new(proxy_server::app(state)).unwrap();

    let response = server.get("/").add_query_param("auth", &token).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["total"].as_u64().unwrap() >= 1);
}
