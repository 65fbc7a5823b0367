//! A small TCP/IP engine for devices that see raw IP frames, plus the
//! session clients that ride on it.

pub mod clock;
pub mod config;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod sched;
pub mod session;
pub mod socket;
pub mod stack;
pub mod tcp;
pub mod udp;
pub mod wire;

#[cfg(test)]
mod test;

pub use clock::{Clock, SystemClock};
pub use config::{DiscoveryConfig, LinkConfig, Medium, SessionConfig, StackConfig};
pub use device::{Device, Tun};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use stack::{SocketHandle, Stack};
