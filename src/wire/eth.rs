use etherparse::{EtherType, Ethernet2Header, Ethernet2HeaderSlice};

use crate::error::{Error, Result};

/// Strip the Ethernet II header. Returns `None` for anything but IPv4.
pub fn strip(frame: &[u8]) -> Result<Option<&[u8]>> {
    let eth =
        Ethernet2HeaderSlice::from_slice(frame).map_err(|_| Error::Malformed("ethernet header"))?;
    if eth.ether_type() != EtherType::IPV4 {
        return Ok(None);
    }
    Ok(Some(&frame[eth.slice().len()..]))
}

/// Prepend an Ethernet II header carrying IPv4.
pub fn wrap(local: [u8; 6], peer: [u8; 6], packet: &[u8]) -> Vec<u8> {
    let header = Ethernet2Header {
        source: local,
        destination: peer,
        ether_type: EtherType::IPV4,
    };
    let mut frame = Vec::with_capacity(Ethernet2Header::LEN + packet.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(packet);
    frame
}
