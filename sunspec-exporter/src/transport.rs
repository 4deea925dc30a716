//! Device transport abstraction.
//!
//! The exporter only needs four things from a SunSpec client: connect,
//! refresh every point in one bulk read, enumerate models and points, and
//! close. [`crate::modbus`] implements them over Modbus/TCP; tests use an
//! in-memory implementation.

use async_trait::async_trait;

use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::model::Model;

/// An open connection to a SunSpec device.
#[async_trait]
pub trait Transport: Send {
    /// Refresh every model and point value in place.
    ///
    /// On error the previously read values are left untouched.
    async fn read_all(&mut self) -> Result<(), TransportError>;

    /// Models as of the last successful [`Transport::read_all`].
    fn models(&self) -> &[Model];

    /// Close the connection. Errors are logged, never returned.
    async fn close(&mut self);
}

/// Opens transports against a device.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self, device: &DeviceConfig) -> Result<Self::Transport, TransportError>;
}
