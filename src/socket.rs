//! What the stack needs from a socket, whatever its protocol.

use std::net::Ipv4Addr;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::wire::Datagram;

/// How specifically a socket claimed an inbound datagram. Lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    /// Local port and remote endpoint both match an open connection.
    Connection,
    /// The socket filters on exactly this local port.
    Port,
    /// The socket listens on every port.
    Wildcard,
}

/// A transport payload ready to be wrapped in IP and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub bytes: Vec<u8>,
}

pub trait Socket {
    /// IP protocol number this socket speaks.
    fn protocol(&self) -> u8;

    /// Whether a datagram from `src` to local `dst_port` belongs here.
    fn accepts(&self, src: Endpoint, dst_port: u16) -> Option<Rank>;

    /// Consume one inbound datagram, returning a reply to transmit.
    fn on_process(&mut self, dgram: &Datagram) -> Result<Option<Outbound>>;
}
