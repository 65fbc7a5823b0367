//! Tunables for the stack and the session clients.
//!
//! Defaults are the values the firmware ships with. Nothing here is
//! persisted; the surrounding firmware (or the demo binary) fills them in.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::endpoint::Endpoint;

/// Largest payload carried in one segment, and the MSS we advertise.
pub const MSS: u16 = 1460;

/// Payloads a socket holds for the application before dropping the oldest.
pub const INBOX_LIMIT: usize = 16;

/// How frames reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// Raw IPv4 packets (TUN style).
    Ip,
    /// Ethernet II frames to a fixed next-hop MAC.
    Ethernet { local: [u8; 6], peer: [u8; 6] },
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub local_addr: Ipv4Addr,
    pub medium: Medium,
    /// Deadline for a blocking connect or send.
    pub wait_timeout: Duration,
    /// Yield granularity while blocked.
    pub wait_step: Duration,
    pub window: u16,
    pub ttl: u8,
    /// First port handed out to outbound connections.
    pub first_ephemeral_port: u16,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            local_addr: Ipv4Addr::new(10, 0, 0, 1),
            medium: Medium::Ip,
            wait_timeout: Duration::from_millis(3000),
            wait_step: Duration::from_millis(1),
            window: 1024,
            ttl: 64,
            first_ephemeral_port: 1024,
        }
    }
}

/// Timing policy for a [`SessionClient`](crate::session::SessionClient).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reboot when nothing was received for this long. Zero disables it.
    pub max_not_active: Duration,
    /// Polling period while no transport exists.
    pub idle_interval: Duration,
    /// Polling period once a transport has been created.
    pub linked_interval: Duration,
    /// Heartbeat period after login.
    pub active_interval: Duration,
    /// Skip the heartbeat if anything was sent within this window. Zero disables it.
    pub ping_quiet: Duration,
    /// Peer is considered lost after this much silence.
    pub stale_after: Duration,
    /// Pause after a login request before looking at the reply.
    pub settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_not_active: Duration::ZERO,
            idle_interval: Duration::from_millis(1000),
            linked_interval: Duration::from_millis(5000),
            active_interval: Duration::from_millis(60_000),
            ping_quiet: Duration::from_millis(60_000),
            stale_after: Duration::from_millis(300_000),
            settle: Duration::from_millis(1000),
        }
    }
}

impl SessionConfig {
    /// The cloud link client cadence.
    pub fn link() -> Self {
        Self::default()
    }

    /// The peer-discovery client cadence: discover every 2 s, ping every 5 s,
    /// give up on the server after 30 s.
    pub fn discovery() -> Self {
        Self {
            max_not_active: Duration::ZERO,
            idle_interval: Duration::from_millis(2000),
            linked_interval: Duration::from_millis(2000),
            active_interval: Duration::from_millis(5000),
            ping_quiet: Duration::ZERO,
            stale_after: Duration::from_millis(30_000),
            settle: Duration::ZERO,
        }
    }
}

/// Credentials and peer for the cloud link client.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub server: Endpoint,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port the discovery server listens on; discover messages are broadcast to it.
    pub port: u16,
    pub device_type: u16,
    pub system_id: [u8; 20],
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: 3377,
            device_type: 0,
            system_id: [0; 20],
        }
    }
}
