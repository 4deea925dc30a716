//! SunSpec over Modbus/TCP using `tokio-modbus`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::model::Model;
use crate::sunspec::{self, BASE_ADDRESSES, END_MODEL_ID, SUNS_MARKER};
use crate::transport::{Connector, Transport};

/// Largest register count allowed in a single read request.
const MAX_READ_REGISTERS: u16 = 125;

/// Upper bound on models walked, guards against a missing end marker.
const MAX_MODELS: usize = 64;

/// Location of one model's register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelLayout {
    id: u16,
    /// First register after the model header.
    address: u16,
    length: u16,
}

/// Connects to SunSpec devices over Modbus/TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusConnector;

#[async_trait]
impl Connector for ModbusConnector {
    type Transport = ModbusTransport;

    async fn connect(&self, device: &DeviceConfig) -> Result<ModbusTransport, TransportError> {
        let addr = resolve(&device.host, device.port).await?;
        let timeout = device.timeout();
        let slave = Slave(device.unit_id);

        let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                timeout_ms: device.timeout_ms,
            })?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut transport = ModbusTransport {
            ctx,
            timeout,
            layout: Vec::new(),
            models: Vec::new(),
        };

        match transport.scan().await {
            Ok(layout) => {
                transport.layout = layout;
                Ok(transport)
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(addr) = format!("{}:{}", host, port).parse::<SocketAddr>() {
        return Ok(addr);
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::Connect(format!("cannot resolve '{}': {}", host, e)))?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("no address found for '{}'", host)))
}

/// An open Modbus/TCP connection to a SunSpec device.
pub struct ModbusTransport {
    ctx: Context,
    timeout: Duration,
    layout: Vec<ModelLayout>,
    models: Vec<Model>,
}

impl ModbusTransport {
    /// Locate the SunSpec map and walk the model headers.
    async fn scan(&mut self) -> Result<Vec<ModelLayout>, TransportError> {
        let base = self.find_base().await?;
        let mut layout = Vec::new();
        let mut address = base + 2;

        while layout.len() < MAX_MODELS {
            let header = self.read_registers(address, 2).await?;
            let (id, length) = (header[0], header[1]);
            if id == END_MODEL_ID {
                break;
            }

            let Some(body) = address.checked_add(2) else {
                break;
            };
            layout.push(ModelLayout {
                id,
                address: body,
                length,
            });

            match body.checked_add(length) {
                Some(next) => address = next,
                None => break,
            }
        }

        info!(
            base,
            models = ?layout.iter().map(|m| m.id).collect::<Vec<_>>(),
            "SunSpec map located"
        );
        Ok(layout)
    }

    async fn find_base(&mut self) -> Result<u16, TransportError> {
        for base in BASE_ADDRESSES {
            match self.read_registers(base, 2).await {
                Ok(regs) if regs[..] == SUNS_MARKER[..] => return Ok(base),
                Ok(_) => debug!(base, "No SunSpec marker"),
                Err(TransportError::Exception { exception, .. }) => {
                    debug!(base, %exception, "Base address not readable")
                }
                Err(e) => return Err(e),
            }
        }
        Err(TransportError::NotSunSpec)
    }

    /// Read holding registers, split into protocol-sized requests.
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut values = Vec::with_capacity(count as usize);
        let mut offset = 0;

        while offset < count {
            let chunk = (count - offset).min(MAX_READ_REGISTERS);
            let start = address
                .checked_add(offset)
                .ok_or_else(|| TransportError::Read {
                    address,
                    message: "register address overflow".to_string(),
                })?;

            let request = self.ctx.read_holding_registers(start, chunk);
            let regs = tokio::time::timeout(self.timeout, request)
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "read",
                    timeout_ms: self.timeout.as_millis() as u64,
                })?
                .map_err(|e| TransportError::Read {
                    address: start,
                    message: e.to_string(),
                })?
                .map_err(|e| TransportError::Exception {
                    address: start,
                    exception: format!("{:?}", e),
                })?;

            if regs.len() != chunk as usize {
                return Err(TransportError::Read {
                    address: start,
                    message: format!("expected {} registers, got {}", chunk, regs.len()),
                });
            }

            values.extend(regs);
            offset += chunk;
        }

        Ok(values)
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn read_all(&mut self) -> Result<(), TransportError> {
        let mut models = Vec::with_capacity(self.layout.len());

        for layout in self.layout.clone() {
            let regs = self.read_registers(layout.address, layout.length).await?;
            let points = match sunspec::lookup(layout.id) {
                Some(def) => sunspec::decode_model(def, &regs),
                None => Vec::new(),
            };
            models.push(Model::new(sunspec::model_name(layout.id), points));
        }

        self.models = models;
        Ok(())
    }

    fn models(&self) -> &[Model] {
        &self.models
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            warn!(error = %e, "Error disconnecting from Modbus device");
        }
    }
}
