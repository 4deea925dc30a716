//! Connection supervisor.
//!
//! Owns the only device session. Each session goes through connect,
//! discovery and polling; any device failure closes it and a fresh one is
//! attempted after a fixed backoff, forever, until shutdown.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, PollConfig};
use crate::discovery::discover;
use crate::error::SessionError;
use crate::poller::Poller;
use crate::registry::SharedRegistry;
use crate::session::DeviceSession;
use crate::shutdown::Shutdown;
use crate::transport::{Connector, Transport};

/// Where the supervisor is in a session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Discovering,
    Polling,
    /// Terminal; reached only through shutdown.
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Disconnected => "disconnected",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Discovering => "discovering",
            SupervisorState::Polling => "polling",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Drives device sessions and keeps the registry fed.
pub struct Supervisor<C: Connector> {
    connector: C,
    device: DeviceConfig,
    registry: SharedRegistry,
    poller: Poller,
    backoff: Duration,
    shutdown: Shutdown,
    state: SupervisorState,
    sessions: u64,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        device: DeviceConfig,
        poll: &PollConfig,
        registry: SharedRegistry,
        shutdown: Shutdown,
    ) -> Self {
        let poller = Poller::new(registry.clone(), poll.scrape_interval(), shutdown.clone());

        Self {
            connector,
            device,
            registry,
            poller,
            backoff: poll.backoff(),
            shutdown,
            state: SupervisorState::Disconnected,
            sessions: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Sessions successfully opened so far.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Run until shutdown. Device errors never end this loop.
    pub async fn run(&mut self) {
        info!(
            host = %self.device.host,
            port = self.device.port,
            unit_id = self.device.unit_id,
            "Starting connection supervisor"
        );

        let metrics = self.registry.exporter().clone();

        while !self.shutdown.is_triggered() {
            self.transition(SupervisorState::Connecting);
            metrics.connect_attempts.inc();

            let mut session = match DeviceSession::open(&self.connector, &self.device).await {
                Ok(session) => session,
                Err(e) => {
                    metrics.connect_failures.inc();
                    warn!(
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Connect failed, retrying"
                    );
                    self.transition(SupervisorState::Disconnected);
                    if !self.shutdown.sleep(self.backoff).await {
                        break;
                    }
                    continue;
                }
            };

            self.sessions += 1;
            metrics.session_up.set(1);
            let outcome = self.drive(&mut session).await;
            session.close().await;
            metrics.session_up.set(0);

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    if matches!(e, SessionError::Read(_)) {
                        metrics.read_failures.inc();
                    }
                    warn!(
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Session failed, reconnecting"
                    );
                    self.transition(SupervisorState::Disconnected);
                    if !self.shutdown.sleep(self.backoff).await {
                        break;
                    }
                }
            }
        }

        self.transition(SupervisorState::Stopped);
        info!(sessions = self.sessions, "Connection supervisor stopped");
    }

    /// Discover then poll one open session. `Ok` means shutdown was observed.
    async fn drive<T: Transport>(
        &mut self,
        session: &mut DeviceSession<T>,
    ) -> Result<(), SessionError> {
        self.transition(SupervisorState::Discovering);
        if self.shutdown.is_triggered() {
            return Ok(());
        }
        session.read_all().await?;
        discover(session.models(), &self.registry);
        if self.registry.is_empty() {
            warn!(endpoint = %session.endpoint(), "Device exposes no publishable points");
        }

        self.transition(SupervisorState::Polling);
        self.poller.run(session).await
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Supervisor state change");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockDevice, ReadStep};
    use crate::registry::MetricRegistry;
    use crate::shutdown;

    fn supervisor(device: &MockDevice, shutdown: Shutdown) -> Supervisor<mock::MockConnector> {
        Supervisor::new(
            device.connector(),
            DeviceConfig::default(),
            &PollConfig::default(),
            MetricRegistry::shared(),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_stops_immediately_when_shut_down() {
        let device = MockDevice::default();
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let mut supervisor = supervisor(&device, shutdown);
        supervisor.run().await;

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(device.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_retries_after_backoff() {
        let device = MockDevice::new(vec![mock::inverter(Some(1.0), None)]);
        device.fail_next_connect("unreachable");
        device.fail_next_connect("unreachable");
        let (trigger, shutdown) = shutdown::channel();

        let mut supervisor = supervisor(&device, shutdown);
        let task = tokio::spawn(async move {
            supervisor.run().await;
            supervisor
        });

        // Two failures at t=0 and t=1, connected at t=2.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(device.connects(), 1);
        assert_eq!(device.open_sessions(), 1);

        trigger.trigger();
        let supervisor = task.await.unwrap();
        assert_eq!(supervisor.sessions(), 1);
        assert_eq!(device.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_read_failure_recycles_session() {
        let device = MockDevice::new(vec![mock::inverter(Some(1.0), None)]);
        device.push_read(ReadStep::Fail("timeout".into()));
        let (trigger, shutdown) = shutdown::channel();

        let mut supervisor = supervisor(&device, shutdown);
        let task = tokio::spawn(async move {
            supervisor.run().await;
            supervisor
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(device.connects(), 2);
        assert_eq!(device.closes(), 1);

        trigger.trigger();
        let supervisor = task.await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert_eq!(device.open_sessions(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::Polling.to_string(), "polling");
        assert_eq!(SupervisorState::Stopped.to_string(), "stopped");
    }
}
