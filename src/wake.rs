//! Wake-and-wait orchestration
//!
//! Each request runs its own coordinator pass:
//! 1. Probe the device once. If it answers, it is ready and nothing is sent.
//! 2. Send a magic packet. Failure is logged but never stops the wait, since
//!    another destination may have delivered it or the device may already be
//!    booting.
//! 3. Poll at a fixed interval until the device answers, the wake deadline
//!    passes, or the caller cancels.
//!
//! There is no shared liveness cache: device state can change between
//! requests, so every request re-probes.

use crate::config::Settings;
use crate::mac::MacAddr;
use crate::probe;
use crate::wol::MagicPacketSender;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal state of a coordinator pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// The device accepted a connection. `woken` is false when it was
    /// already up on the first probe.
    Ready { woken: bool },
    /// The device did not come up before the wake timeout
    TimedOut,
    /// The caller went away while waiting
    Cancelled,
}

/// Brings the device up before a request is relayed
pub struct WakeCoordinator {
    mac: MacAddr,
    sender: MagicPacketSender,
    host: String,
    port: u16,
    poll_interval: Duration,
    wake_timeout: Duration,
    probe_timeout: Duration,
}

impl WakeCoordinator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            mac: settings.mac,
            sender: MagicPacketSender::new(settings.wake_destinations.clone(), settings.send_timeout),
            host: settings.device_ip.to_string(),
            port: settings.device_port,
            poll_interval: settings.poll_interval,
            wake_timeout: settings.wake_timeout,
            probe_timeout: settings.probe_timeout,
        }
    }

    pub fn wake_timeout(&self) -> Duration {
        self.wake_timeout
    }

    /// Make sure the device is reachable, waking it if necessary.
    pub async fn ensure_awake(&self, cancel: &CancellationToken) -> WakeOutcome {
        match self.probe(cancel).await {
            Some(true) => return WakeOutcome::Ready { woken: false },
            Some(false) => {}
            None => return WakeOutcome::Cancelled,
        }

        info!(host = %self.host, port = self.port, mac = %self.mac, "Device appears down, sending magic packet");
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return WakeOutcome::Cancelled,
            result = self.sender.send(&self.mac) => result,
        };
        match sent {
            Ok(addr) => info!(mac = %self.mac, %addr, "Magic packet sent"),
            Err(e) => warn!(mac = %self.mac, error = %e, "Failed to send magic packet, waiting anyway"),
        }

        let started = Instant::now();
        let deadline = started + self.wake_timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.probe(cancel).await {
                Some(true) => {
                    info!(
                        host = %self.host,
                        port = self.port,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Device is awake"
                    );
                    return WakeOutcome::Ready { woken: true };
                }
                Some(false) => {
                    debug!(host = %self.host, port = self.port, attempts, "Device not reachable yet");
                }
                None => return WakeOutcome::Cancelled,
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempts, "Request cancelled while waiting for device");
                    return WakeOutcome::Cancelled;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        host = %self.host,
                        port = self.port,
                        attempts,
                        timeout_secs = self.wake_timeout.as_secs_f64(),
                        "Timeout waiting for device to come up"
                    );
                    return WakeOutcome::TimedOut;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Probe once. `None` means the caller cancelled first.
    async fn probe(&self, cancel: &CancellationToken) -> Option<bool> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            reachable = probe::is_reachable(&self.host, self.port, self.probe_timeout) => Some(reachable),
        }
    }
}
