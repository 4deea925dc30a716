//! Prometheus exporter for SunSpec devices.
//!
//! Polls a SunSpec device over Modbus/TCP, discovers the points it reports
//! and publishes each one as a gauge on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  SunSpec device │────>│   Supervisor    │────>│ MetricRegistry  │
//! │  (Modbus/TCP)   │     │ (discover/poll) │     │                 │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! TARGET_IP=10.0.0.20 sunspec-exporter
//! sunspec-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod coerce;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod metrics;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod modbus;
pub mod model;
pub mod poller;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod sunspec;
pub mod supervisor;
pub mod transport;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use modbus::ModbusConnector;
pub use registry::{MetricRegistry, SharedRegistry};
pub use supervisor::Supervisor;
