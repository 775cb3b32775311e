use prometheus::{Encoder, Registry, TextEncoder};

/// Implemented by a service's Prometheus metrics bundle so [`super::Telemetry`]
/// can encode it alongside the process/system metrics it collects on its own.
#[async_trait::async_trait]
pub trait TelemetryMetrics: Clone + Send + Sync + Sized + 'static {
    /// The registry this bundle's metrics were registered against.
    fn registry(&self) -> &Registry;

    /// Returns a clone of the metrics bundle, or `None` if metrics were
    /// never configured (e.g. `ServerMetrics::default()` used as a stand-in
    /// during tests).
    fn metrics(&self) -> Option<Self>;

    /// Encodes this bundle's registry in the Prometheus text exposition
    /// format. Encoding failures are logged and yield an empty string
    /// rather than failing the `/metrics` request.
    fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry().gather(), &mut buffer) {
            tracing::error!("could not encode telemetry registry: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
