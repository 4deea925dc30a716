//! Environment variable overlay.
//!
//! Values read from the environment override whatever the configuration file
//! (or the built-in defaults) provided. Malformed values never fail startup:
//! the documented default is used instead and an [`EnvFallback`] is recorded
//! so the caller can log it once tracing is up.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A source of environment variables.
pub trait EnvSource {
    /// Look up a raw variable value.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A malformed variable that was replaced by its documented default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFallback {
    /// Variable name.
    pub key: String,
    /// The raw value that failed to parse.
    pub raw: String,
    /// The default that was used instead.
    pub default: String,
    /// Parse error message.
    pub reason: String,
}

impl fmt::Display for EnvFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:?} is invalid ({}), using default {}",
            self.key, self.raw, self.reason, self.default
        )
    }
}

/// Reads typed values from an [`EnvSource`], collecting fallbacks.
pub struct EnvOverlay<'a, E: EnvSource + ?Sized> {
    env: &'a E,
    fallbacks: Vec<EnvFallback>,
}

impl<'a, E: EnvSource + ?Sized> EnvOverlay<'a, E> {
    pub fn new(env: &'a E) -> Self {
        Self {
            env,
            fallbacks: Vec::new(),
        }
    }

    /// Trimmed string value; unset and empty are both `None`.
    pub fn string(&self, key: &str) -> Option<String> {
        self.env
            .var(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parsed value.
    ///
    /// Returns `None` when the variable is unset, the parsed value when it is
    /// well formed, and `default` when it is not.
    pub fn parsed<T>(&mut self, key: &str, default: T) -> Option<T>
    where
        T: FromStr + fmt::Display,
        T::Err: fmt::Display,
    {
        let raw = self.string(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                self.fallbacks.push(EnvFallback {
                    key: key.to_string(),
                    raw,
                    default: default.to_string(),
                    reason: e.to_string(),
                });
                Some(default)
            }
        }
    }

    /// Consume the overlay and return the recorded fallbacks.
    pub fn finish(self) -> Vec<EnvFallback> {
        self.fallbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unset_is_none() {
        let vars = env(&[]);
        let mut overlay = EnvOverlay::new(&vars);

        assert_eq!(overlay.parsed::<u16>("TARGET_PORT", 502), None);
        assert!(overlay.finish().is_empty());
    }

    #[test]
    fn test_valid_value() {
        let vars = env(&[("TARGET_PORT", " 1502 ")]);
        let mut overlay = EnvOverlay::new(&vars);

        assert_eq!(overlay.parsed::<u16>("TARGET_PORT", 502), Some(1502));
        assert!(overlay.finish().is_empty());
    }

    #[test]
    fn test_malformed_value_uses_default() {
        let vars = env(&[("TARGET_PORT", "abc")]);
        let mut overlay = EnvOverlay::new(&vars);

        assert_eq!(overlay.parsed::<u16>("TARGET_PORT", 502), Some(502));

        let fallbacks = overlay.finish();
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].key, "TARGET_PORT");
        assert_eq!(fallbacks[0].raw, "abc");
        assert_eq!(fallbacks[0].default, "502");
    }

    #[test]
    fn test_empty_string_is_unset() {
        let vars = env(&[("TARGET_IP", "   ")]);
        let overlay = EnvOverlay::new(&vars);

        assert_eq!(overlay.string("TARGET_IP"), None);
    }

    #[test]
    fn test_fallback_display() {
        let fallback = EnvFallback {
            key: "LISTEN_PORT".into(),
            raw: "x".into(),
            default: "8080".into(),
            reason: "invalid digit found in string".into(),
        };

        assert_eq!(
            fallback.to_string(),
            "LISTEN_PORT=\"x\" is invalid (invalid digit found in string), using default 8080"
        );
    }
}
