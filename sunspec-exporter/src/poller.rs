//! Steady-state poll loop for one device session.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::coerce::coerce;
use crate::error::{MetricSetError, SessionError};
use crate::model::Model;
use crate::registry::{MetricRegistry, SharedRegistry};
use crate::session::DeviceSession;
use crate::shutdown::Shutdown;
use crate::transport::Transport;

/// Outcome of publishing one bulk read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    /// Updates rejected by the parameter's label schema.
    pub failed: usize,
    /// Points with no metric; they are never added mid-session.
    pub unregistered: usize,
    pub null: usize,
}

/// Push the current value of every registered point into the registry.
///
/// A failed update is logged and skipped; the rest of the cycle carries on.
pub fn publish_cycle(models: &[Model], registry: &MetricRegistry) -> CycleReport {
    let mut report = CycleReport::default();

    for model in models {
        for point in &model.points {
            let Some(value) = &point.value else {
                report.null += 1;
                continue;
            };

            let coerced = coerce(value, point.declared_unit());
            match registry.set(&point.name, &model.name, &coerced) {
                Ok(()) => report.updated += 1,
                Err(MetricSetError::Unknown(_)) => report.unregistered += 1,
                Err(e) => {
                    warn!(
                        model = %model.name,
                        param = %point.name,
                        unit = point.declared_unit().unwrap_or(""),
                        value = %value,
                        error = %e,
                        "Failed to update metric"
                    );
                    report.failed += 1;
                }
            }
        }
    }

    report
}

/// Reads the device on a fixed interval and publishes every cycle.
pub struct Poller {
    registry: SharedRegistry,
    interval: Duration,
    shutdown: Shutdown,
}

impl Poller {
    pub fn new(registry: SharedRegistry, interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            registry,
            interval,
            shutdown,
        }
    }

    /// Poll until shutdown (`Ok`) or until a read fails (`Err`).
    ///
    /// Read failures are not retried here; the caller owns reconnection.
    pub async fn run<T: Transport>(
        &self,
        session: &mut DeviceSession<T>,
    ) -> Result<(), SessionError> {
        let mut cycles: u64 = 0;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let started = Instant::now();
            session.read_all().await?;
            let report = publish_cycle(session.models(), &self.registry);
            self.registry
                .exporter()
                .poll_duration
                .observe(started.elapsed().as_secs_f64());

            cycles += 1;
            trace!(
                cycle = cycles,
                updated = report.updated,
                failed = report.failed,
                unregistered = report.unregistered,
                null = report.null,
                "Poll cycle complete"
            );

            if self.shutdown.is_triggered() || !self.shutdown.sleep(self.interval).await {
                break;
            }
        }

        debug!(cycles, "Poll loop stopped by shutdown");
        Ok(())
    }
}
