use std::net::Ipv4Addr;

use super::ip::PROTO_UDP;
use super::{checksum, ensure, read_u16};
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 8;

/// Read-only view of a UDP header and its payload.
#[derive(Debug, Clone, Copy)]
pub struct UdpHeaderView<'a> {
    buf: &'a [u8],
}

impl<'a> UdpHeaderView<'a> {
    /// Overlay `buf`; the length field must fit inside it. Bytes past the
    /// length field are ignored.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        ensure("udp header", buf, HEADER_LEN)?;
        let len = read_u16(buf, 4) as usize;
        if len < HEADER_LEN {
            return Err(Error::Malformed("udp length"));
        }
        ensure("udp payload", buf, len)?;
        Ok(UdpHeaderView { buf: &buf[..len] })
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buf, 0)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buf, 2)
    }

    pub fn length(&self) -> u16 {
        read_u16(self.buf, 4)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buf, 6)
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buf[HEADER_LEN..]
    }

    /// A zero checksum means the sender did not compute one.
    pub fn verify(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        self.checksum() == 0 || checksum::verify(src, dst, PROTO_UDP, self.buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl UdpDatagram {
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        UdpDatagram {
            src_port,
            dst_port,
            payload,
        }
    }

    pub fn encode(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Result<Vec<u8>> {
        let len = HEADER_LEN + self.payload.len();
        let wire_len = u16::try_from(len).map_err(|_| Error::TooLarge(self.payload.len()))?;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&wire_len.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.payload);

        let sum = match checksum::compute(src, dst, PROTO_UDP, &out) {
            // zero is reserved for "no checksum"
            0 => 0xffff,
            s => s,
        };
        out[6..8].copy_from_slice(&sum.to_be_bytes());
        Ok(out)
    }
}
