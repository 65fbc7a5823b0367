use std::net::Ipv4Addr;

use etherparse::{IpNumber, Ipv4HeaderSlice, PacketBuilder};

use super::ensure;
use crate::error::{Error, Result};

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// The parts of an inbound IPv4 packet the sockets care about.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    /// Transport bytes, trimmed to the IP total length.
    pub payload: &'a [u8],
}

impl<'a> Datagram<'a> {
    pub fn parse(packet: &'a [u8]) -> Result<Self> {
        let ip = Ipv4HeaderSlice::from_slice(packet).map_err(|_| Error::Malformed("ipv4 header"))?;
        let header_len = ip.slice().len();
        let total = ip.total_len() as usize;
        if total < header_len {
            return Err(Error::Malformed("ipv4 total length"));
        }
        ensure("ipv4 payload", packet, total)?;
        Ok(Datagram {
            src: ip.source_addr(),
            dst: ip.destination_addr(),
            protocol: ip.protocol().0,
            payload: &packet[header_len..total],
        })
    }
}

/// Wrap a transport payload in an IPv4 header.
pub fn build(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, protocol: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let builder = PacketBuilder::ipv4(src.octets(), dst.octets(), ttl);
    let mut packet = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut packet, IpNumber(protocol), payload)
        .map_err(|e| Error::Frame(e.to_string()))?;
    Ok(packet)
}
