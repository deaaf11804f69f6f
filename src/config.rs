use crate::mac::MacAddr;
use crate::relay::PoolConfig;
use crate::wol::{default_destinations, DEFAULT_WAKE_PORT};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Environment variables that override file settings
pub const ENV_DEVICE_MAC: &str = "DEVICE_MAC";
pub const ENV_DEVICE_IP: &str = "DEVICE_IP";
pub const ENV_DEVICE_PORT: &str = "DEVICE_PORT";
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL_SEC";
pub const ENV_WAKE_TIMEOUT: &str = "WAKE_TIMEOUT_SEC";

/// Raw configuration as read from the TOML file and environment
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and connection pool settings
    #[serde(default)]
    pub server: ServerConfig,

    /// The device to wake and proxy to
    #[serde(default)]
    pub device: DeviceConfig,

    /// Wake and polling behaviour
    #[serde(default)]
    pub wake: WakeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:11434). A bare ":port" binds all interfaces.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Maximum idle connections kept to the device (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Hardware address of the device (required)
    pub mac: Option<String>,

    /// IP address of the device (required)
    pub ip: Option<String>,

    /// Port the proxied service listens on (required)
    pub port: Option<u16>,

    /// UDP port magic packets are sent to (default: 9)
    #[serde(default = "default_wake_port")]
    pub wake_port: u16,

    /// Broadcast address magic packets are also sent to (default: 255.255.255.255)
    #[serde(default = "default_broadcast")]
    pub broadcast: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac: None,
            ip: None,
            port: None,
            wake_port: default_wake_port(),
            broadcast: default_broadcast(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WakeConfig {
    /// Seconds between liveness probes while waiting (default: 2)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Seconds to wait for the device before giving up (default: 120)
    #[serde(default = "default_wake_timeout")]
    pub timeout_secs: f64,

    /// Bound on a single TCP probe in milliseconds (default: 1000)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Write deadline for each magic packet datagram in milliseconds (default: 2000)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_wake_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:11434".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_wake_port() -> u16 {
    DEFAULT_WAKE_PORT
}

fn default_broadcast() -> String {
    Ipv4Addr::BROADCAST.to_string()
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_wake_timeout() -> f64 {
    120.0 // 2 minutes covers a cold boot
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_send_timeout() -> u64 {
    2000
}

/// Validated, immutable settings shared by every component
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub mac: MacAddr,
    pub device_ip: IpAddr,
    pub device_port: u16,
    pub wake_destinations: Vec<SocketAddr>,
    pub poll_interval: Duration,
    pub wake_timeout: Duration,
    pub probe_timeout: Duration,
    pub send_timeout: Duration,
    pub pool: PoolConfig,
}

impl Settings {
    /// `ip:port` of the device, bracketed for IPv6
    pub fn target_authority(&self) -> String {
        SocketAddr::new(self.device_ip, self.device_port).to_string()
    }
}

impl Config {
    /// Load configuration from an optional TOML file, apply environment
    /// overrides and validate the result.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Settings> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()
    }

    /// Parse a TOML configuration file without validating it
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(mac) = lookup(ENV_DEVICE_MAC) {
            self.device.mac = Some(mac);
        }
        if let Some(ip) = lookup(ENV_DEVICE_IP) {
            self.device.ip = Some(ip);
        }
        if let Some(port) = lookup(ENV_DEVICE_PORT) {
            let port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a port number, got {:?}: {}", ENV_DEVICE_PORT, port, e))?;
            self.device.port = Some(port);
        }
        if let Some(listen) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen = listen;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL) {
            self.wake.poll_interval_secs = env_secs(ENV_POLL_INTERVAL, &value, default_poll_interval());
        }
        if let Some(value) = lookup(ENV_WAKE_TIMEOUT) {
            self.wake.timeout_secs = env_secs(ENV_WAKE_TIMEOUT, &value, default_wake_timeout());
        }

        Ok(())
    }

    /// Validate all configuration, reporting every problem at once
    pub fn validate(&self) -> anyhow::Result<Settings> {
        let mut errors = Vec::new();

        let mac = match self.device.mac.as_deref() {
            Some(mac) => match mac.parse::<MacAddr>() {
                Ok(mac) => Some(mac),
                Err(e) => {
                    errors.push(format!("device.mac: {}", e));
                    None
                }
            },
            None => {
                errors.push(format!("device.mac ({}) must be set", ENV_DEVICE_MAC));
                None
            }
        };

        let device_ip = match self.device.ip.as_deref() {
            Some(ip) => match ip.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(e) => {
                    errors.push(format!("device.ip: invalid IP address {:?}: {}", ip, e));
                    None
                }
            },
            None => {
                errors.push(format!("device.ip ({}) must be set", ENV_DEVICE_IP));
                None
            }
        };

        let device_port = match self.device.port {
            Some(0) => {
                errors.push("device.port must be greater than 0".to_string());
                None
            }
            Some(port) => Some(port),
            None => {
                errors.push(format!("device.port ({}) must be set", ENV_DEVICE_PORT));
                None
            }
        };

        let broadcast = match self.device.broadcast.trim().parse::<Ipv4Addr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                errors.push(format!(
                    "device.broadcast: invalid IPv4 address {:?}: {}",
                    self.device.broadcast, e
                ));
                None
            }
        };

        let listen_addr = match parse_listen_addr(&self.server.listen) {
            Ok(addr) => Some(addr),
            Err(e) => {
                errors.push(format!("server.listen: {}", e));
                None
            }
        };

        let poll_interval = positive_secs("wake.poll_interval_secs", self.wake.poll_interval_secs, &mut errors);
        let wake_timeout = positive_secs("wake.timeout_secs", self.wake.timeout_secs, &mut errors);

        if self.wake.probe_timeout_ms == 0 {
            errors.push("wake.probe_timeout_ms must be greater than 0".to_string());
        }
        if self.wake.send_timeout_ms == 0 {
            errors.push("wake.send_timeout_ms must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        // Every None above pushed an error, so the bail covers them
        match (mac, device_ip, device_port, broadcast, listen_addr, poll_interval, wake_timeout) {
            (
                Some(mac),
                Some(device_ip),
                Some(device_port),
                Some(broadcast),
                Some(listen_addr),
                Some(poll_interval),
                Some(wake_timeout),
            ) => Ok(Settings {
                listen_addr,
                mac,
                device_ip,
                device_port,
                wake_destinations: default_destinations(device_ip, broadcast, self.device.wake_port),
                poll_interval,
                wake_timeout,
                probe_timeout: Duration::from_millis(self.wake.probe_timeout_ms),
                send_timeout: Duration::from_millis(self.wake.send_timeout_ms),
                pool: PoolConfig {
                    max_idle_per_host: self.server.pool_max_idle_per_host,
                    idle_timeout: Duration::from_secs(self.server.pool_idle_timeout_secs),
                },
            }),
            _ => anyhow::bail!("Configuration errors: incomplete configuration"),
        }
    }
}

/// Parse a listen address, accepting the ":port" shorthand for all interfaces
fn parse_listen_addr(listen: &str) -> Result<SocketAddr, String> {
    let listen = listen.trim();
    let candidate = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };
    candidate
        .parse()
        .map_err(|e| format!("invalid listen address {:?}: {}", listen, e))
}

/// Parse a seconds value from the environment, falling back to `default`
/// when it is not a positive number.
fn env_secs(key: &str, value: &str, default: f64) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => secs,
        _ => {
            warn!(key, value, default_secs = default, "Invalid duration, using default");
            default
        }
    }
}

fn positive_secs(name: &str, secs: f64, errors: &mut Vec<String>) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        errors.push(format!("{} must be a positive number of seconds, got {}", name, secs));
        None
    }
}
