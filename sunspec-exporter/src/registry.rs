//! Metric registry keyed by device parameter name.
//!
//! A parameter gets at most one metric for the lifetime of the process. Its
//! label schema is frozen the first time a value is seen and every later
//! update must match it. Parameters that fail creation are remembered and
//! never retried.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::{Registry, Unit};
use tracing::debug;

use crate::coerce::Coerced;
use crate::error::{MetricCreationError, MetricSetError};
use crate::metrics::{ExporterMetrics, RESERVED_PREFIX};
use crate::model::Point;

/// Label key-value pairs attached to a series.
pub type LabelSet = Vec<(String, String)>;

/// Gauge family backing one device parameter.
pub type GaugeFamily = Family<LabelSet, Gauge<f64, AtomicU64>>;

/// Shared handle to the registry.
pub type SharedRegistry = Arc<MetricRegistry>;

/// Label names attached to a parameter's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelSchema {
    /// `{model}` - numeric point without a declared unit.
    Model,
    /// `{model, unit}` - numeric point with a declared unit.
    ModelUnit,
    /// `{model, value}` - categorical point.
    ModelValue,
}

impl LabelSchema {
    /// Pick the schema for a reading.
    pub fn for_reading(coerced: &Coerced) -> Self {
        match coerced {
            Coerced::Numeric { unit: Some(_), .. } => LabelSchema::ModelUnit,
            Coerced::Numeric { unit: None, .. } => LabelSchema::Model,
            Coerced::Categorical { .. } => LabelSchema::ModelValue,
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            LabelSchema::Model => &["model"],
            LabelSchema::ModelUnit => &["model", "unit"],
            LabelSchema::ModelValue => &["model", "value"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelSchema::Model => "{model}",
            LabelSchema::ModelUnit => "{model, unit}",
            LabelSchema::ModelValue => "{model, value}",
        }
    }

    /// Build the label values for a reading, or `None` if it does not fit.
    ///
    /// Values are escaped here since the text encoder writes them verbatim.
    fn labels(&self, model: &str, coerced: &Coerced) -> Option<LabelSet> {
        let model = ("model".to_string(), escape_label_value(model));
        match (self, coerced) {
            (LabelSchema::Model, Coerced::Numeric { unit: None, .. }) => Some(vec![model]),
            (LabelSchema::ModelUnit, Coerced::Numeric { unit: Some(unit), .. }) => {
                Some(vec![model, ("unit".to_string(), escape_label_value(unit))])
            }
            (LabelSchema::ModelValue, Coerced::Categorical { label }) => {
                Some(vec![model, ("value".to_string(), escape_label_value(label))])
            }
            _ => None,
        }
    }
}

impl fmt::Display for LabelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to create a parameter's metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub param: String,
    pub schema: LabelSchema,
    pub unit: Option<String>,
    pub help: String,
}

impl MetricSpec {
    pub fn new(param: impl Into<String>, schema: LabelSchema) -> Self {
        Self {
            param: param.into(),
            schema,
            unit: None,
            help: String::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Spec for a discovered point given its first non-null reading.
    pub fn for_point(point: &Point, coerced: &Coerced) -> Self {
        let mut spec = Self::new(&point.name, LabelSchema::for_reading(coerced))
            .with_help(point.description.clone());
        if let Coerced::Numeric {
            unit: Some(unit), ..
        } = coerced
        {
            spec = spec.with_unit(unit.clone());
        }
        spec
    }

    /// Name as it appears in the exposition, including the unit suffix.
    pub fn exposed_name(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{}_{}", self.param, unit),
            None => self.param.clone(),
        }
    }

    fn validate(&self) -> Result<(), MetricCreationError> {
        if !is_valid_metric_name(&self.param) {
            return Err(MetricCreationError::InvalidName(self.param.clone()));
        }
        if let Some(unit) = &self.unit
            && !is_valid_unit(unit)
        {
            return Err(MetricCreationError::InvalidUnit {
                name: self.param.clone(),
                unit: unit.clone(),
            });
        }
        if self.param.starts_with(RESERVED_PREFIX) {
            return Err(MetricCreationError::Collision(self.param.clone()));
        }
        Ok(())
    }
}

/// A registered parameter metric.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    spec: MetricSpec,
    family: GaugeFamily,
    /// Last categorical label published per model.
    last_labels: Arc<Mutex<HashMap<String, String>>>,
}

impl MetricEntry {
    pub fn param(&self) -> &str {
        &self.spec.param
    }

    pub fn schema(&self) -> LabelSchema {
        self.spec.schema
    }

    pub fn unit(&self) -> Option<&str> {
        self.spec.unit.as_deref()
    }

    pub fn exposed_name(&self) -> String {
        self.spec.exposed_name()
    }

    fn apply(&self, model: &str, coerced: &Coerced) -> Result<(), MetricSetError> {
        let labels =
            self.spec
                .schema
                .labels(model, coerced)
                .ok_or_else(|| MetricSetError::SchemaMismatch {
                    param: self.spec.param.clone(),
                    expected: self.spec.schema.as_str(),
                    got: coerced.to_string(),
                })?;

        if let Coerced::Categorical { label } = coerced {
            let mut last = self.last_labels.lock();
            if let Some(previous) = last.insert(model.to_string(), label.clone())
                && previous != *label
                && let Some(stale) = self
                    .spec
                    .schema
                    .labels(model, &Coerced::Categorical { label: previous })
            {
                self.family.get_or_create(&stale).set(0.0);
            }
        }

        self.family.get_or_create(&labels).set(coerced.gauge_value());
        Ok(())
    }
}

struct RegistryState {
    registry: Registry,
    entries: HashMap<String, MetricEntry>,
    exposed: HashSet<String>,
    rejected: HashSet<String>,
}

/// Thread-safe mapping from parameter name to its published metric.
pub struct MetricRegistry {
    state: RwLock<RegistryState>,
    exporter: ExporterMetrics,
}

impl MetricRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let exporter = ExporterMetrics::new(&mut registry);

        Self {
            state: RwLock::new(RegistryState {
                registry,
                entries: HashMap::new(),
                exposed: HashSet::new(),
                rejected: HashSet::new(),
            }),
            exporter,
        }
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Self::new())
    }

    /// The exporter's own metrics.
    pub fn exporter(&self) -> &ExporterMetrics {
        &self.exporter
    }

    /// Create the metric for `spec.param` unless it already exists.
    ///
    /// A second call for the same parameter returns the existing entry
    /// untouched, whatever its spec. A parameter that failed once keeps
    /// failing with [`MetricCreationError::Rejected`].
    pub fn ensure(&self, spec: &MetricSpec) -> Result<MetricEntry, MetricCreationError> {
        let mut state = self.state.write();

        if let Some(entry) = state.entries.get(&spec.param) {
            return Ok(entry.clone());
        }
        if state.rejected.contains(&spec.param) {
            return Err(MetricCreationError::Rejected(spec.param.clone()));
        }

        let exposed = spec.exposed_name();
        let checked = spec.validate().and_then(|_| {
            if state.exposed.contains(&exposed) {
                Err(MetricCreationError::Collision(exposed.clone()))
            } else {
                Ok(())
            }
        });
        if let Err(e) = checked {
            state.rejected.insert(spec.param.clone());
            self.exporter.creation_failures.inc();
            return Err(e);
        }

        let family = GaugeFamily::default();
        match &spec.unit {
            Some(unit) => state.registry.register_with_unit(
                spec.param.clone(),
                spec.help.clone(),
                Unit::Other(unit.clone()),
                family.clone(),
            ),
            None => state
                .registry
                .register(spec.param.clone(), spec.help.clone(), family.clone()),
        }

        let entry = MetricEntry {
            spec: spec.clone(),
            family,
            last_labels: Arc::new(Mutex::new(HashMap::new())),
        };
        state.exposed.insert(exposed);
        state.entries.insert(spec.param.clone(), entry.clone());

        debug!(
            param = %spec.param,
            schema = %spec.schema,
            unit = spec.unit.as_deref().unwrap_or(""),
            "Created metric"
        );

        Ok(entry)
    }

    /// Route a reading to the parameter's metric.
    pub fn set(&self, param: &str, model: &str, coerced: &Coerced) -> Result<(), MetricSetError> {
        let state = self.state.read();
        let entry = state
            .entries
            .get(param)
            .ok_or_else(|| MetricSetError::Unknown(param.to_string()))?;

        entry.apply(model, coerced).inspect_err(|_| {
            self.exporter.set_failures.inc();
        })
    }

    pub fn contains(&self, param: &str) -> bool {
        self.state.read().entries.contains_key(param)
    }

    pub fn is_rejected(&self, param: &str) -> bool {
        self.state.read().rejected.contains(param)
    }

    pub fn entry(&self, param: &str) -> Option<MetricEntry> {
        self.state.read().entries.get(param).cloned()
    }

    /// Number of parameter metrics.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the exposition text for every registered metric.
    pub fn render(&self) -> Result<String, fmt::Error> {
        let state = self.state.read();
        let mut buffer = String::new();
        encode(&mut buffer, &state.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Escape a label value for the text exposition format.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Units become a name suffix and must match `[a-zA-Z0-9_]+`.
pub fn is_valid_unit(unit: &str) -> bool {
    !unit.is_empty() && unit.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::coerce;
    use crate::model::PointValue;

    fn numeric(value: f64, unit: Option<&str>) -> Coerced {
        Coerced::Numeric {
            value,
            unit: unit.map(str::to_string),
        }
    }

    fn categorical(label: &str) -> Coerced {
        Coerced::Categorical {
            label: label.to_string(),
        }
    }

    #[test]
    fn test_schema_for_reading() {
        assert_eq!(
            LabelSchema::for_reading(&numeric(1.0, Some("W"))),
            LabelSchema::ModelUnit
        );
        assert_eq!(
            LabelSchema::for_reading(&numeric(1.0, None)),
            LabelSchema::Model
        );
        assert_eq!(
            LabelSchema::for_reading(&categorical("MPPT")),
            LabelSchema::ModelValue
        );
        assert_eq!(LabelSchema::ModelUnit.label_names(), &["model", "unit"]);
    }

    #[test]
    fn test_spec_for_point() {
        let point = Point::new("W", Some(PointValue::Float(123.4)))
            .with_units("W")
            .with_description("AC Power");
        let coerced = coerce(point.value.as_ref().unwrap(), point.declared_unit());
        let spec = MetricSpec::for_point(&point, &coerced);

        assert_eq!(spec.param, "W");
        assert_eq!(spec.schema, LabelSchema::ModelUnit);
        assert_eq!(spec.unit.as_deref(), Some("W"));
        assert_eq!(spec.help, "AC Power");
        assert_eq!(spec.exposed_name(), "W_W");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = MetricRegistry::new();
        let spec = MetricSpec::new("Hz", LabelSchema::ModelUnit).with_unit("Hz");

        registry.ensure(&spec).unwrap();
        registry.ensure(&spec).unwrap();

        assert_eq!(registry.len(), 1);
        let output = registry.render().unwrap();
        assert_eq!(output.matches("# TYPE Hz_Hz gauge").count(), 1);
    }

    #[test]
    fn test_ensure_keeps_first_schema() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("St", LabelSchema::ModelValue))
            .unwrap();

        let entry = registry
            .ensure(&MetricSpec::new("St", LabelSchema::Model))
            .unwrap();

        assert_eq!(entry.schema(), LabelSchema::ModelValue);
    }

    #[test]
    fn test_invalid_name_rejected_permanently() {
        let registry = MetricRegistry::new();
        let spec = MetricSpec::new("1bad-name", LabelSchema::Model);

        assert_eq!(
            registry.ensure(&spec).unwrap_err(),
            MetricCreationError::InvalidName("1bad-name".into())
        );
        assert!(registry.is_rejected("1bad-name"));
        assert_eq!(
            registry.ensure(&spec).unwrap_err(),
            MetricCreationError::Rejected("1bad-name".into())
        );
        assert!(!registry.contains("1bad-name"));
    }

    #[test]
    fn test_invalid_unit_rejected() {
        let registry = MetricRegistry::new();
        let spec = MetricSpec::new("PF", LabelSchema::ModelUnit).with_unit("%");

        assert!(matches!(
            registry.ensure(&spec),
            Err(MetricCreationError::InvalidUnit { .. })
        ));
    }

    #[test]
    fn test_exposed_name_collision() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("W", LabelSchema::ModelUnit).with_unit("W"))
            .unwrap();

        assert_eq!(
            registry
                .ensure(&MetricSpec::new("W_W", LabelSchema::Model))
                .unwrap_err(),
            MetricCreationError::Collision("W_W".into())
        );
    }

    #[test]
    fn test_reserved_prefix_collision() {
        let registry = MetricRegistry::new();
        let spec = MetricSpec::new("sunspec_exporter_session_up", LabelSchema::Model);

        assert!(matches!(
            registry.ensure(&spec),
            Err(MetricCreationError::Collision(_))
        ));
    }

    #[test]
    fn test_set_numeric_and_categorical() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("W", LabelSchema::ModelUnit).with_unit("W"))
            .unwrap();
        registry
            .ensure(&MetricSpec::new("St", LabelSchema::ModelValue))
            .unwrap();

        registry
            .set("W", "inverter", &numeric(123.4, Some("W")))
            .unwrap();
        registry.set("St", "inverter", &categorical("MPPT")).unwrap();

        let output = registry.render().unwrap();
        assert!(output.contains("W_W{model=\"inverter\",unit=\"W\"} 123.4"));
        assert!(output.contains("St{model=\"inverter\",value=\"MPPT\"} 1"));
    }

    #[test]
    fn test_set_unknown_param() {
        let registry = MetricRegistry::new();

        assert_eq!(
            registry.set("W", "inverter", &numeric(1.0, None)),
            Err(MetricSetError::Unknown("W".into()))
        );
    }

    #[test]
    fn test_set_schema_mismatch() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("W", LabelSchema::ModelUnit).with_unit("W"))
            .unwrap();

        let result = registry.set("W", "inverter", &categorical("OFF"));
        assert!(matches!(
            result,
            Err(MetricSetError::SchemaMismatch { expected: "{model, unit}", .. })
        ));

        // A unitless number no longer fits either.
        assert!(registry.set("W", "inverter", &numeric(5.0, None)).is_err());
    }

    #[test]
    fn test_categorical_change_zeroes_previous_label() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("St", LabelSchema::ModelValue))
            .unwrap();

        registry.set("St", "inverter", &categorical("MPPT")).unwrap();
        registry
            .set("St", "inverter", &categorical("SLEEPING"))
            .unwrap();

        let output = registry.render().unwrap();
        assert!(output.contains("St{model=\"inverter\",value=\"MPPT\"} 0"));
        assert!(output.contains("St{model=\"inverter\",value=\"SLEEPING\"} 1"));
    }

    #[test]
    fn test_categorical_label_is_escaped() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("SN", LabelSchema::ModelValue))
            .unwrap();

        registry
            .set("SN", "common", &categorical("AB\"12\nX\\"))
            .unwrap();
        registry.set("SN", "common", &categorical("CD\"34")).unwrap();

        let output = registry.render().unwrap();
        assert!(output.contains(r#"SN{model="common",value="AB\"12\nX\\"} 0"#));
        assert!(output.contains(r#"SN{model="common",value="CD\"34"} 1"#));
        assert!(output.lines().all(|line| !line.starts_with('X')));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("MPPT"), "MPPT");
        assert_eq!(escape_label_value(r"a\b"), r"a\\b");
        assert_eq!(escape_label_value("a\"b"), r#"a\"b"#);
        assert_eq!(escape_label_value("a\nb"), r"a\nb");
    }

    #[test]
    fn test_same_param_in_two_models() {
        let registry = MetricRegistry::new();
        registry
            .ensure(&MetricSpec::new("A", LabelSchema::ModelUnit).with_unit("A"))
            .unwrap();

        registry.set("A", "inverter", &numeric(10.0, Some("A"))).unwrap();
        registry.set("A", "meter", &numeric(4.5, Some("A"))).unwrap();

        let output = registry.render().unwrap();
        assert!(output.contains("A_A{model=\"inverter\",unit=\"A\"} 10"));
        assert!(output.contains("A_A{model=\"meter\",unit=\"A\"} 4.5"));
    }

    #[test]
    fn test_render_concurrent_with_set() {
        let registry = MetricRegistry::shared();
        registry
            .ensure(&MetricSpec::new("Hz", LabelSchema::ModelUnit).with_unit("Hz"))
            .unwrap();

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    registry
                        .set("Hz", "inverter", &numeric(50.0 + i as f64 / 1000.0, Some("Hz")))
                        .unwrap();
                }
            })
        };

        for _ in 0..100 {
            assert!(registry.render().unwrap().contains("# TYPE Hz_Hz gauge"));
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_metric_name("W"));
        assert!(is_valid_metric_name("_private:x1"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("9lives"));
        assert!(!is_valid_metric_name("a-b"));
        assert!(is_valid_unit("Pct"));
        assert!(!is_valid_unit("%"));
        assert!(!is_valid_unit(""));
    }
}
