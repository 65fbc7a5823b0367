//! Header codecs for everything below the sockets: Ethernet and IPv4 framing
//! (through `etherparse`), and hand-built TCP and UDP headers with the shared
//! pseudo-header checksum.
//!
//! Decoders borrow the frame they read from and are meant to live for one
//! dispatch only. They never trust a length field without checking it against
//! the slice.

pub mod checksum;
pub mod eth;
pub mod ip;
pub mod tcp;
pub mod udp;

pub use self::ip::Datagram;
pub use self::tcp::{TcpHeaderView, TcpSegment, MSS_OPTION};
pub use self::udp::{UdpDatagram, UdpHeaderView};

use crate::error::{Error, Result};

/// Swap a 16-bit value between host and network order.
pub fn swap16(v: u16) -> u16 {
    v.swap_bytes()
}

/// Swap a 32-bit value between host and network order.
pub fn swap32(v: u32) -> u32 {
    v.swap_bytes()
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn ensure(what: &'static str, buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(Error::Truncated {
            what,
            need,
            have: buf.len(),
        });
    }
    Ok(())
}
