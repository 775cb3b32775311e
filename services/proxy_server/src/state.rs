use std::sync::Arc;

use pg_pool::ConnectionPool;
use telemetry::metrics::Telemetry;

use crate::{auth::ReplayGuard, config::Config, metrics::ServerMetrics, shutdown::ShutdownCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub auth: Arc<ReplayGuard>,
    pub config: Arc<Config>,
    pub telemetry: Arc<Telemetry<ServerMetrics>>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl axum::extract::FromRef<AppState> for Arc<ConnectionPool> {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
