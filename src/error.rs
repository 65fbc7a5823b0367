use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::stack::SocketHandle;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Buffer ended before a complete header.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("invalid endpoint {0}")]
    InvalidEndpoint(Endpoint),

    #[error("address in use: port {port} to {remote}")]
    AddressInUse { port: u16, remote: Endpoint },

    #[error("no such socket {0}")]
    NoSocket(SocketHandle),

    #[error("connection refused by {0}")]
    Refused(Endpoint),

    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    #[error("payload of {0} bytes exceeds the segment size")]
    TooLarge(usize),

    #[error("not connected")]
    NotConnected,

    /// The shared stack is already borrowed further up the call chain.
    #[error("stack is busy")]
    Busy,

    #[error("cipher key must not be empty")]
    EmptyKey,

    #[error("frame build failed: {0}")]
    Frame(String),

    #[error("device i/o: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
