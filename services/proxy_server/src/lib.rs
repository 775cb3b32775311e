//! Authenticating HTTP+WebSocket front end that multiplexes client requests
//! over a single pooled Postgres connection set.

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod request_id;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use config::Config;
pub use state::AppState;

/// Builds the full router: the authenticated `/` multiplexer, `/metrics`,
/// an optional unauthenticated health-check path, and a 404 fallback for
/// everything else.
pub fn app(state: AppState) -> axum::Router {
    let mut router = axum::Router::new()
        .route(
            "/",
            axum::routing::get(routes::root::dispatch).post(routes::root::dispatch),
        )
        .route("/metrics", axum::routing::get(routes::root::metrics));

    if let Some(path) = state.config.health_check_path.clone() {
        let path = format!("/{}", path.trim_start_matches('/'));
        router = router.route(path.as_str(), axum::routing::get(routes::root::unauthenticated_health));
    }

    router
        .fallback(routes::fallback)
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
