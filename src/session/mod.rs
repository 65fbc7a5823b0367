//! Long-lived client sessions: connect, authenticate, heartbeat, and start
//! over when the peer goes quiet.
//!
//! [`SessionClient`] owns the timing policy and the status walk. What goes on
//! the wire comes from a [`Protocol`], and how it gets there from a
//! [`Connector`] and the [`Transport`] it creates.

mod client;
pub mod discovery;
pub mod envelope;
pub mod link;
pub mod rc4;
pub mod transport;

use std::fmt;

pub use self::client::SessionClient;
pub use self::discovery::DiscoveryProtocol;
pub use self::envelope::{Envelope, Sequence};
pub use self::link::LinkProtocol;
pub use self::transport::{TcpConnector, TcpLink, UdpConnector, UdpLink};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Status {
    Idle = 0,
    Handshaken = 1,
    LoggedIn = 2,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Handshaken => write!(f, "handshaken"),
            Status::LoggedIn => write!(f, "logged-in"),
        }
    }
}

/// A channel carrying whole messages to one peer.
pub trait Transport {
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Bytes received since the last call, if any. Never blocks.
    fn recv(&mut self) -> Option<Vec<u8>>;

    /// False once the underlying link is gone for good.
    fn linked(&self) -> bool;

    /// Address future sends to whoever spoke last.
    fn pin_peer(&mut self) {}
}

/// Creates transports on demand.
pub trait Connector {
    type Link: Transport;

    fn connect(&mut self) -> Result<Self::Link>;
}

/// Clock readings handed to a protocol when it builds a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    /// Milliseconds since the client was created.
    pub uptime_ms: u64,
    /// Wall-clock milliseconds since the Unix epoch, server-adjusted.
    pub wall_ms: u64,
}

/// Something a protocol recognised in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Handshake,
    LoggedIn { key: Option<String> },
    LoginRejected { reason: String },
    Pong {
        echo_ms: Option<u64>,
        server_time: Option<u64>,
    },
    /// A message for an application route.
    Other { route: String, body: Vec<u8> },
    /// Well-formed, but nothing this layer acts on.
    Ignored,
}

pub trait Protocol {
    /// First message on a fresh transport, for protocols with a handshake.
    fn hello(&mut self) -> Option<Result<Vec<u8>>> {
        None
    }

    /// The login request; `None` when the protocol has no login step.
    fn login(&mut self, ctx: &Context) -> Result<Option<Vec<u8>>>;

    fn ping(&mut self, ctx: &Context) -> Result<Vec<u8>>;

    /// Decode the first message in `buf`, returning it with the number of
    /// bytes used. `Ok(None)` waits for more bytes; an error discards `buf`.
    fn decode(&mut self, buf: &[u8]) -> Result<Option<(Event, usize)>>;

    /// Forget per-session state after the transport is dropped.
    fn reset(&mut self) {}
}
