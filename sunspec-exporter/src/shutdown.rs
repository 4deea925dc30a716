//! Process-wide cooperative shutdown.
//!
//! Loops check [`Shutdown::is_triggered`] at iteration boundaries and use
//! [`Shutdown::sleep`] for every delay, so a trigger wakes a sleeping loop
//! right away. An in-flight device read is never interrupted; the loop exits
//! at its next checkpoint instead.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Sending half, fired once on SIGINT/SIGTERM.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another receiving handle.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half, cloned into every task that must stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger and receiver.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// Never resolves if the trigger is dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless shutdown comes first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// SIGINT/SIGTERM handlers, installed as soon as this is created.
///
/// Create it before any slow startup step so an early signal is not handled
/// by the default action.
#[derive(Debug)]
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Register the handlers. Must be called inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => {
                    info!("Received SIGINT, shutting down...");
                }
                _ = self.terminate.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down...");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let (_trigger, shutdown) = channel();

        assert!(shutdown.sleep(Duration::from_secs(5)).await);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_wakes_sleep() {
        let (trigger, shutdown) = channel();

        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();

        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_sleep_after_trigger_returns_immediately() {
        let (trigger, shutdown) = channel();
        trigger.trigger();
        trigger.trigger();

        assert!(shutdown.is_triggered());
        assert!(!shutdown.sleep(Duration::from_secs(3600)).await);
        shutdown.cancelled().await;
    }

    #[tokio::test]
    async fn test_subscribe_sees_trigger() {
        let (trigger, _shutdown) = channel();
        let late = trigger.subscribe();

        trigger.trigger();
        assert!(late.is_triggered());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listener_catches_sigterm() {
        let mut listener = SignalListener::install().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_never_cancels() {
        let (trigger, shutdown) = channel();
        drop(trigger);

        assert!(shutdown.sleep(Duration::from_secs(1)).await);
    }
}
