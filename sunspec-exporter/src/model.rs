//! Device data model: models, points and raw point values.

use std::fmt;

/// A raw point value as decoded by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    /// Integer reading (unscaled, or scaled by a non-negative factor).
    Integer(i64),
    /// Floating point reading.
    Float(f64),
    /// Text or enumerated symbol.
    Text(String),
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Integer(v) => write!(f, "{}", v),
            PointValue::Float(v) => write!(f, "{}", v),
            PointValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Integer(v)
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl From<&str> for PointValue {
    fn from(v: &str) -> Self {
        PointValue::Text(v.to_string())
    }
}

/// A named parameter within a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Point name, e.g. `W`.
    pub name: String,
    /// Declared unit, e.g. `W` or `Hz`.
    pub units: Option<String>,
    /// Human readable description.
    pub description: String,
    /// Current value; `None` when the device reports the point as not implemented.
    pub value: Option<PointValue>,
}

impl Point {
    pub fn new(name: impl Into<String>, value: Option<PointValue>) -> Self {
        Self {
            name: name.into(),
            units: None,
            description: String::new(),
            value,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The declared unit, if present and non-empty.
    pub fn declared_unit(&self) -> Option<&str> {
        self.units
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// A named group of points reported by the device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub name: String,
    pub points: Vec<Point>,
}

impl Model {
    pub fn new(name: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_unit() {
        assert_eq!(Point::new("W", None).with_units("W").declared_unit(), Some("W"));
        assert_eq!(Point::new("W", None).with_units("  ").declared_unit(), None);
        assert_eq!(Point::new("W", None).declared_unit(), None);
    }

    #[test]
    fn test_point_value_display() {
        assert_eq!(PointValue::Integer(42).to_string(), "42");
        assert_eq!(PointValue::Float(1.5).to_string(), "1.5");
        assert_eq!(PointValue::from("MPPT").to_string(), "MPPT");
    }
}
