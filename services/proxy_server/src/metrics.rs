//! Prometheus metrics bundle: a registry plus a handful of typed
//! collectors, wired into `telemetry::Telemetry`.

use async_trait::async_trait;
use prometheus::{
    register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge, Registry,
};
use telemetry::metrics::TelemetryMetrics;

#[derive(Clone, Debug)]
pub struct ServerMetrics {
    pub registry: Registry,

    pub requests_total: IntCounterVec,
    pub pool_available: IntGauge,
    pub pool_borrowed: IntGauge,
    pub pool_connecting: IntGauge,
    pub pool_total: IntGauge,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        ServerMetrics::new(None).expect("failed to create default ServerMetrics")
    }
}

#[async_trait]
impl TelemetryMetrics for ServerMetrics {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn metrics(&self) -> Option<Self> {
        Some(self.clone())
    }
}

impl ServerMetrics {
    /// Registers a fresh instance under a random metric-name prefix, so
    /// constructing more than one `ServerMetrics` in the same process (as
    /// tests do) never collides with prometheus's process-global registry.
    pub fn new_with_random_prefix() -> anyhow::Result<Self> {
        ServerMetrics::new(Some(Self::generate_random_prefix()))
    }

    fn generate_random_prefix() -> String {
        format!("t{}", uuid::Uuid::new_v4().simple())
    }

    pub fn new(prefix: Option<String>) -> anyhow::Result<Self> {
        let metric_prefix = prefix
            .clone()
            .map(|p| format!("{p}_"))
            .unwrap_or_default();

        let requests_total = register_int_counter_vec!(
            format!("{metric_prefix}proxy_requests_total"),
            "Requests served by the proxy, by method and HTTP status",
            &["method", "status"],
        )?;
        let pool_available = register_int_gauge!(
            format!("{metric_prefix}pg_pool_available"),
            "Connections currently idle in the pool"
        )?;
        let pool_borrowed = register_int_gauge!(
            format!("{metric_prefix}pg_pool_borrowed"),
            "Connections currently leased out by the pool"
        )?;
        let pool_connecting = register_int_gauge!(
            format!("{metric_prefix}pg_pool_connecting"),
            "Connections the pool is currently creating"
        )?;
        let pool_total = register_int_gauge!(
            format!("{metric_prefix}pg_pool_total"),
            "Total connections currently adopted by the pool"
        )?;

        let registry = Registry::new_custom(prefix, None)?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(pool_available.clone()))?;
        registry.register(Box::new(pool_borrowed.clone()))?;
        registry.register(Box::new(pool_connecting.clone()))?;
        registry.register(Box::new(pool_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            pool_available,
            pool_borrowed,
            pool_connecting,
            pool_total,
        })
    }

    pub fn record_request(&self, method: &str, status: u16) {
        self.requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    pub fn observe_pool(&self, stats: pg_pool::PoolStats) {
        self.pool_available.set(stats.available as i64);
        self.pool_borrowed.set(stats.borrowed as i64);
        self.pool_connecting.set(stats.connecting as i64);
        self.pool_total.set(stats.total as i64);
    }
}
