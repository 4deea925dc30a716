//! Exporter self-metrics.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Prefix reserved for the exporter's own metrics.
pub const RESERVED_PREFIX: &str = "sunspec_exporter_";

/// Counters and timings describing the exporter itself.
#[derive(Debug, Clone)]
pub struct ExporterMetrics {
    /// Duration of one bulk read plus metric update cycle.
    pub poll_duration: Histogram,
    pub connect_attempts: Counter,
    pub connect_failures: Counter,
    pub read_failures: Counter,
    pub set_failures: Counter,
    pub creation_failures: Counter,
    /// 1 while a device session is open.
    pub session_up: Gauge,
}

impl ExporterMetrics {
    /// Create and register all exporter metrics.
    pub fn new(registry: &mut Registry) -> Self {
        let poll_duration = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "sunspec_exporter_poll_duration_seconds",
            "Time spent reading the device and updating metrics",
            poll_duration.clone(),
        );

        let connect_attempts = Counter::default();
        registry.register(
            "sunspec_exporter_connect_attempts",
            "Device connection attempts",
            connect_attempts.clone(),
        );

        let connect_failures = Counter::default();
        registry.register(
            "sunspec_exporter_connect_failures",
            "Device connection attempts that failed",
            connect_failures.clone(),
        );

        let read_failures = Counter::default();
        registry.register(
            "sunspec_exporter_read_failures",
            "Bulk device reads that failed",
            read_failures.clone(),
        );

        let set_failures = Counter::default();
        registry.register(
            "sunspec_exporter_set_failures",
            "Parameter updates skipped because of a label schema mismatch",
            set_failures.clone(),
        );

        let creation_failures = Counter::default();
        registry.register(
            "sunspec_exporter_creation_failures",
            "Discovered parameters that could not be turned into metrics",
            creation_failures.clone(),
        );

        let session_up = Gauge::default();
        registry.register(
            "sunspec_exporter_session_up",
            "Whether a device session is currently open",
            session_up.clone(),
        );

        Self {
            poll_duration,
            connect_attempts,
            connect_failures,
            read_failures,
            set_failures,
            creation_failures,
            session_up,
        }
    }
}
