use std::net::Ipv4Addr;

use super::ip::PROTO_TCP;
use super::{checksum, ensure, read_u16, read_u32};
use crate::error::{Error, Result};
use crate::tcp::{FIN, SYN};

/// Fixed TCP header size without options.
pub const HEADER_LEN: usize = 20;

/// Options carried on SYN and SYN+ACK: MSS 1460, then NOP padding closed by
/// end-of-options. Three words, so the header is eight words long.
pub const MSS_OPTION: [u8; 12] = [
    0x02, 0x04, 0x05, 0xb4, // kind=2 len=4 mss=1460
    0x01, 0x01, 0x01, 0x01, // nop
    0x01, 0x01, 0x01, 0x00, // nop, eol
];

const KIND_EOL: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;

/// Read-only view of a TCP header laid over a received buffer.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeaderView<'a> {
    buf: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeaderView<'a> {
    /// Overlay `buf`, which holds a header followed by the payload.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        ensure("tcp header", buf, HEADER_LEN)?;
        let words = (buf[12] >> 4) as usize;
        if words < 5 {
            return Err(Error::Malformed("tcp data offset"));
        }
        let header_len = words * 4;
        ensure("tcp options", buf, header_len)?;
        Ok(TcpHeaderView { buf, header_len })
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buf, 0)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buf, 2)
    }

    pub fn seq(&self) -> u32 {
        read_u32(self.buf, 4)
    }

    pub fn ack(&self) -> u32 {
        read_u32(self.buf, 8)
    }

    /// Header length in 32-bit words.
    pub fn data_offset(&self) -> u8 {
        (self.header_len / 4) as u8
    }

    pub fn flags(&self) -> u8 {
        self.buf[13]
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags() & flag != 0
    }

    pub fn window(&self) -> u16 {
        read_u16(self.buf, 14)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buf, 16)
    }

    pub fn urgent(&self) -> u16 {
        read_u16(self.buf, 18)
    }

    pub fn options(&self) -> &'a [u8] {
        &self.buf[HEADER_LEN..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buf[self.header_len..]
    }

    /// The MSS the peer advertised, if the options carry one.
    pub fn mss(&self) -> Option<u16> {
        let mut opts = self.options();
        while let [kind, rest @ ..] = opts {
            match *kind {
                KIND_EOL => return None,
                KIND_NOP => opts = rest,
                _ => {
                    let len = *rest.first()? as usize;
                    if len < 2 || opts.len() < len {
                        return None;
                    }
                    if *kind == KIND_MSS && len == 4 {
                        return Some(u16::from_be_bytes([opts[2], opts[3]]));
                    }
                    opts = &opts[len..];
                }
            }
        }
        None
    }
}

/// An outbound segment, encoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u8) -> Self {
        TcpSegment {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_mss(mut self) -> Self {
        self.options = MSS_OPTION.to_vec();
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Header length in bytes, options padded to a word boundary.
    pub fn header_len(&self) -> usize {
        HEADER_LEN + (self.options.len() + 3) / 4 * 4
    }

    /// Sequence space consumed: the payload, plus one for SYN and for FIN.
    pub fn seq_len(&self) -> u32 {
        let mut n = self.payload.len() as u32;
        if self.flags & SYN != 0 {
            n += 1;
        }
        if self.flags & FIN != 0 {
            n += 1;
        }
        n
    }

    /// Encode header and payload with the checksum for `src` → `dst`.
    pub fn encode(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let header_len = self.header_len();
        let mut out = Vec::with_capacity(header_len + self.payload.len());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(((header_len / 4) as u8) << 4);
        out.push(self.flags);
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum, filled below
        out.extend_from_slice(&[0, 0]); // urgent pointer
        out.extend_from_slice(&self.options);
        out.resize(header_len, KIND_EOL);
        out.extend_from_slice(&self.payload);

        let sum = checksum::compute(src, dst, PROTO_TCP, &out);
        out[16..18].copy_from_slice(&sum.to_be_bytes());
        out
    }
}
