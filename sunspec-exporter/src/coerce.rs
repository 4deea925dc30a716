//! Classification of raw point values into settable metric values.

use std::fmt;

use crate::model::PointValue;

/// Sentinel gauge value for categorical readings.
pub const CATEGORICAL_SENTINEL: f64 = 1.0;

/// A point value normalized for the metric registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// Numeric reading with its declared unit, if any.
    Numeric { value: f64, unit: Option<String> },
    /// Opaque label, published with [`CATEGORICAL_SENTINEL`].
    Categorical { label: String },
}

impl Coerced {
    /// The value to set on the gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Coerced::Numeric { value, .. } => *value,
            Coerced::Categorical { .. } => CATEGORICAL_SENTINEL,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Coerced::Numeric { .. })
    }
}

impl fmt::Display for Coerced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coerced::Numeric { value, unit: Some(unit) } => write!(f, "{} {}", value, unit),
            Coerced::Numeric { value, unit: None } => write!(f, "{}", value),
            Coerced::Categorical { label } => write!(f, "{:?}", label),
        }
    }
}

/// Classify a non-null reading.
///
/// Integers and floats become [`Coerced::Numeric`] carrying the declared unit
/// (blank units are dropped); anything else is [`Coerced::Categorical`].
pub fn coerce(value: &PointValue, unit: Option<&str>) -> Coerced {
    let unit = unit.map(str::trim).filter(|u| !u.is_empty());

    match value {
        PointValue::Integer(v) => Coerced::Numeric {
            value: *v as f64,
            unit: unit.map(str::to_string),
        },
        PointValue::Float(v) => Coerced::Numeric {
            value: *v,
            unit: unit.map(str::to_string),
        },
        PointValue::Text(label) => Coerced::Categorical {
            label: label.clone(),
        },
    }
}
