//! Wake-on-LAN magic packet construction and delivery
//!
//! A magic packet is 6 bytes of `0xFF` followed by the target hardware
//! address repeated 16 times. Delivery is best-effort: the packet is sent
//! over UDP to each destination in order and the first accepted write wins.

use crate::mac::MacAddr;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Conventional "discard" port used for Wake-on-LAN
pub const DEFAULT_WAKE_PORT: u16 = 9;

/// Number of times the hardware address is repeated in a magic packet
const MAC_REPETITIONS: usize = 16;

/// Length of the synchronization stream at the start of the packet
const SYNC_LEN: usize = 6;

/// Total size of a magic packet in bytes
pub const MAGIC_PACKET_LEN: usize = SYNC_LEN + MAC_REPETITIONS * 6;

/// Errors produced while sending a magic packet
#[derive(Debug, Error)]
pub enum WakeError {
    #[error("no wake destinations configured")]
    NoDestinations,

    #[error("failed to send magic packet to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("timed out sending magic packet to {addr} after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },
}

/// A Wake-on-LAN magic packet for a single hardware address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    pub fn new(mac: &MacAddr) -> Self {
        let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
        let octets = mac.octets();
        for chunk in packet[SYNC_LEN..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&octets);
        }
        Self(packet)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Build the default destination list: the device itself, then the limited
/// broadcast address, both on the wake port.
pub fn default_destinations(device_ip: IpAddr, broadcast: Ipv4Addr, wake_port: u16) -> Vec<SocketAddr> {
    let mut destinations = vec![SocketAddr::new(device_ip, wake_port)];
    let broadcast = SocketAddr::new(IpAddr::V4(broadcast), wake_port);
    if !destinations.contains(&broadcast) {
        destinations.push(broadcast);
    }
    destinations
}

/// Sends magic packets to a fixed, ordered list of destinations
#[derive(Debug, Clone)]
pub struct MagicPacketSender {
    destinations: Vec<SocketAddr>,
    send_timeout: Duration,
}

impl MagicPacketSender {
    pub fn new(destinations: Vec<SocketAddr>, send_timeout: Duration) -> Self {
        Self {
            destinations,
            send_timeout,
        }
    }

    /// Send a magic packet for `mac`.
    ///
    /// Returns the destination that accepted the write. A failing destination
    /// does not stop the attempt; the last error is returned only when every
    /// destination failed.
    pub async fn send(&self, mac: &MacAddr) -> Result<SocketAddr, WakeError> {
        let packet = MagicPacket::new(mac);
        let mut last_err = WakeError::NoDestinations;

        for &addr in &self.destinations {
            match send_to(packet.as_bytes(), addr, self.send_timeout).await {
                Ok(()) => {
                    debug!(%mac, %addr, "Magic packet sent");
                    return Ok(addr);
                }
                Err(e) => {
                    warn!(%mac, %addr, error = %e, "Magic packet destination failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

async fn send_to(packet: &[u8], addr: SocketAddr, timeout: Duration) -> Result<(), WakeError> {
    let send_err = |source| WakeError::Send { addr, source };

    let bind_addr = match addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind_addr).await.map_err(send_err)?;
    if addr.is_ipv4() {
        socket.set_broadcast(true).map_err(send_err)?;
    }

    match tokio::time::timeout(timeout, socket.send_to(packet, addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(send_err(e)),
        Err(_) => Err(WakeError::Timeout { addr, timeout }),
    }
}
