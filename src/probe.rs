//! TCP liveness probing
//!
//! A device counts as up once its service port completes a TCP handshake.
//! No data is exchanged; the connection is dropped as soon as it is
//! established.

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// Default bound on a single connection attempt
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Returns true if `host:port` accepts a TCP connection within `timeout`.
///
/// Refused, unreachable, unresolvable and timed out are all reported as
/// `false`.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            trace!(host, port, error = %e, "Probe connection failed");
            false
        }
        Err(_) => {
            trace!(host, port, timeout_ms = timeout.as_millis() as u64, "Probe timed out");
            false
        }
    }
}
