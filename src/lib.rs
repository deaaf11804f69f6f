//! Wakegate - A reverse proxy that wakes its backend on demand
//!
//! This library provides an HTTP proxy for a device that may be asleep:
//! - Probes the device with a TCP connect before every request
//! - Sends a Wake-on-LAN magic packet when the device is down
//! - Polls until the device answers, the wake timeout passes, or the client leaves
//! - Relays the request and streams the response back unbuffered

pub mod config;
pub mod error;
pub mod mac;
pub mod probe;
pub mod proxy;
pub mod relay;
pub mod wake;
pub mod wol;
