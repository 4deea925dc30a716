//! In-memory SunSpec device for testing.
//!
//! A [`MockDevice`] is a shared handle: hand a [`MockConnector`] to the code
//! under test and keep the device to script failures and inspect counters.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::model::{Model, Point, PointValue};
use crate::transport::{Connector, Transport};

/// One scripted bulk read.
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Succeed and expose these models.
    Models(Vec<Model>),
    /// Fail with a read error.
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    connect_failures: VecDeque<String>,
    reads: VecDeque<ReadStep>,
    models: Vec<Model>,
    connects: usize,
    closes: usize,
    read_calls: usize,
}

/// Shared handle to a scripted device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// A device that always reports `models`.
    pub fn new(models: Vec<Model>) -> Self {
        let device = Self::default();
        device.state.lock().models = models;
        device
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }

    /// Fail the next connect attempt.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.state.lock().connect_failures.push_back(message.into());
    }

    /// Queue a read step; once the queue is empty reads report the default models.
    pub fn push_read(&self, step: ReadStep) {
        self.state.lock().reads.push_back(step);
    }

    /// Replace the default models.
    pub fn set_models(&self, models: Vec<Model>) {
        self.state.lock().models = models;
    }

    /// Successful connects.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().read_calls
    }

    /// Connections opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        let state = self.state.lock();
        state.connects - state.closes
    }
}

/// [`Connector`] for a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _device: &DeviceConfig) -> Result<MockTransport, TransportError> {
        let mut state = self.device.state.lock();
        if let Some(message) = state.connect_failures.pop_front() {
            return Err(TransportError::Connect(message));
        }
        state.connects += 1;

        Ok(MockTransport {
            device: self.device.clone(),
            models: Vec::new(),
        })
    }
}

/// Transport backed by a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    models: Vec<Model>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_all(&mut self) -> Result<(), TransportError> {
        let step = {
            let mut state = self.device.state.lock();
            state.read_calls += 1;
            state
                .reads
                .pop_front()
                .unwrap_or_else(|| ReadStep::Models(state.models.clone()))
        };

        match step {
            ReadStep::Models(models) => {
                self.models = models;
                Ok(())
            }
            ReadStep::Fail(message) => Err(TransportError::Read {
                address: 0,
                message,
            }),
        }
    }

    fn models(&self) -> &[Model] {
        &self.models
    }

    async fn close(&mut self) {
        self.device.state.lock().closes += 1;
    }
}

/// Inverter model with AC power `W` (unit "W") and operating state `St`.
pub fn inverter(watts: Option<f64>, state: Option<&str>) -> Model {
    Model::new(
        "inverter",
        vec![
            Point::new("W", watts.map(PointValue::Float))
                .with_units("W")
                .with_description("AC Power"),
            Point::new("St", state.map(PointValue::from)).with_description("Operating State"),
        ],
    )
}

/// Common model with manufacturer and device address.
pub fn common(manufacturer: &str) -> Model {
    Model::new(
        "common",
        vec![
            Point::new("Mn", Some(PointValue::from(manufacturer))).with_description("Manufacturer"),
            Point::new("DA", Some(PointValue::Integer(1))).with_description("Device Address"),
        ],
    )
}
