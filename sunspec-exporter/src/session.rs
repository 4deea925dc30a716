//! Exclusive handle to one live device connection.

use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::SessionError;
use crate::model::{Model, Point};
use crate::transport::{Connector, Transport};

/// One open connection to the device.
///
/// Owned by a single task at a time. Must be closed with
/// [`DeviceSession::close`] before it is dropped.
pub struct DeviceSession<T: Transport> {
    transport: Option<T>,
    endpoint: String,
    reads: u64,
}

impl<T: Transport> DeviceSession<T> {
    /// Connect to the device.
    pub async fn open<C>(connector: &C, device: &DeviceConfig) -> Result<Self, SessionError>
    where
        C: Connector<Transport = T>,
    {
        let transport =
            connector
                .connect(device)
                .await
                .map_err(|source| SessionError::Connect {
                    host: device.host.clone(),
                    port: device.port,
                    source,
                })?;

        let endpoint = format!("{}:{}", device.host, device.port);
        info!(endpoint = %endpoint, unit_id = device.unit_id, "Connected to SunSpec device");

        Ok(Self {
            transport: Some(transport),
            endpoint,
            reads: 0,
        })
    }

    /// Refresh every point in one bulk read.
    pub async fn read_all(&mut self) -> Result<(), SessionError> {
        let transport = self.transport.as_mut().ok_or(SessionError::Closed)?;
        transport.read_all().await.map_err(SessionError::Read)?;
        self.reads += 1;
        Ok(())
    }

    /// Models from the last successful read; empty before the first one.
    pub fn models(&self) -> &[Model] {
        match &self.transport {
            Some(transport) if self.reads > 0 => transport.models(),
            _ => &[],
        }
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models().iter().map(|m| m.name.as_str())
    }

    /// Points of the first model with the given name.
    pub fn points(&self, model: &str) -> &[Point] {
        self.models()
            .iter()
            .find(|m| m.name == model)
            .map(|m| m.points.as_slice())
            .unwrap_or(&[])
    }

    /// Number of successful bulk reads on this session.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            info!(
                endpoint = %self.endpoint,
                reads = self.reads,
                "Closed connection to SunSpec device"
            );
        } else {
            debug!(endpoint = %self.endpoint, "Session already closed");
        }
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            warn!(endpoint = %self.endpoint, "Device session dropped without being closed");
        }
    }
}
