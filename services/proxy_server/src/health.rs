//! `GET /` (authenticated) and the optional unauthenticated
//! `GET /<healthCheck>` path: acquire a connection, run a probe query,
//! release, and report pool stats plus the probe's latency.

use std::time::Instant;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::{error::internal_server_error, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub available: usize,
    pub borrowed: usize,
    pub connecting: usize,
    pub total: usize,
    pub latency_ms: u128,
}

pub async fn handler(state: &AppState) -> axum::response::Response {
    let start = Instant::now();
    let conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            return internal_server_error(format!("Error acquiring connection: {e}"))
                .into_response();
        }
    };

    let probe = conn.query("SELECT now()", &[]).await;
    let _ = state.pool.release(conn).await;
    if let Err(e) = probe {
        return internal_server_error(format!("health probe failed: {e}")).into_response();
    }

    let latency_ms = start.elapsed().as_millis();
    let stats = state.pool.stats();
    state.telemetry.maybe_use_metrics(|m| m.observe_pool(stats));

    (
        StatusCode::OK,
        Json(HealthResponse {
            available: stats.available,
            borrowed: stats.borrowed,
            connecting: stats.connecting,
            total: stats.total,
            latency_ms,
        }),
    )
        .into_response()
}
