//! Error taxonomy for the exporter.
//!
//! Each error sits in one recovery tier:
//!
//! - [`SessionError`] - device-side, recovered by the supervisor with a
//!   fixed backoff and a fresh session.
//! - [`MetricCreationError`] - recovered by permanently skipping the parameter.
//! - [`MetricSetError`] - recovered by skipping the parameter for one cycle.
//! - [`ServerError`] - fatal at startup.

use std::net::SocketAddr;

use thiserror::Error;

/// Failures reported by a device transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("read failed at register {address}: {message}")]
    Read { address: u16, message: String },
    #[error("device exception at register {address}: {exception}")]
    Exception { address: u16, exception: String },
    #[error("no SunSpec marker found at any base address")]
    NotSunSpec,
}

/// Failures that end a device session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },
    #[error("bulk read failed: {0}")]
    Read(#[source] TransportError),
    #[error("session already closed")]
    Closed,
}

/// A parameter could not be turned into a metric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricCreationError {
    #[error("invalid metric name '{0}'")]
    InvalidName(String),
    #[error("invalid unit '{unit}' for metric '{name}'")]
    InvalidUnit { name: String, unit: String },
    #[error("metric name '{0}' collides with an existing metric")]
    Collision(String),
    /// The parameter failed creation earlier in this process.
    #[error("metric '{0}' was rejected earlier")]
    Rejected(String),
}

/// A value could not be applied to its metric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricSetError {
    #[error("no metric registered for '{0}'")]
    Unknown(String),
    #[error("value for '{param}' does not match label schema {expected}: got {got}")]
    SchemaMismatch {
        param: String,
        expected: &'static str,
        got: String,
    },
}

/// HTTP server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}
