pub mod metrics;

pub use metrics::{Telemetry, TelemetryMetrics};
