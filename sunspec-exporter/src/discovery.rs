//! One-shot schema discovery for a fresh session.
//!
//! Every point that reports a value creates its metric. Points that are
//! null at this moment are skipped and stay unpublished for the rest of the
//! session, even if they report a value later; the next session's discovery
//! gets another chance at them.

use tracing::{debug, info, trace, warn};

use crate::coerce::coerce;
use crate::error::MetricCreationError;
use crate::model::Model;
use crate::registry::{MetricRegistry, MetricSpec};

/// Outcome of a discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Points walked.
    pub visited: usize,
    /// Metrics created by this pass.
    pub created: usize,
    /// Points whose metric already existed.
    pub existing: usize,
    /// Points skipped because their value was null.
    pub null: usize,
    /// Points whose metric could not be created.
    pub rejected: usize,
}

/// Walk every model and point, creating metrics for non-null points.
pub fn discover(models: &[Model], registry: &MetricRegistry) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for model in models {
        for point in &model.points {
            report.visited += 1;

            let Some(value) = &point.value else {
                trace!(model = %model.name, param = %point.name, "Skipping null point");
                report.null += 1;
                continue;
            };

            if registry.contains(&point.name) {
                report.existing += 1;
                continue;
            }

            let coerced = coerce(value, point.declared_unit());
            let spec = MetricSpec::for_point(point, &coerced);

            match registry.ensure(&spec) {
                Ok(_) => {
                    debug!(
                        model = %model.name,
                        param = %point.name,
                        schema = %spec.schema,
                        "Discovered parameter"
                    );
                    report.created += 1;
                }
                Err(MetricCreationError::Rejected(_)) => {
                    trace!(
                        model = %model.name,
                        param = %point.name,
                        "Parameter previously rejected"
                    );
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!(
                        model = %model.name,
                        param = %point.name,
                        error = %e,
                        "Cannot create metric, parameter will be skipped"
                    );
                    report.rejected += 1;
                }
            }
        }
    }

    info!(
        models = models.len(),
        visited = report.visited,
        created = report.created,
        existing = report.existing,
        null = report.null,
        rejected = report.rejected,
        "Discovery complete"
    );

    report
}
