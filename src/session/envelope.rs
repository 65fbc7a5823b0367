//! Length-prefixed message envelope shared by the session protocols.
//!
//! ```text
//! 0       1       2       3       4               6
//! +-------+-------+-------+-------+-------+-------+---------------
//! | code  | flags |  seq  |  rsv  |  length (BE)  | payload ...
//! +-------+-------+-------+-------+-------+-------+---------------
//! ```

use crate::error::{Error, Result};
use crate::wire::read_u16;

pub const HEADER_LEN: usize = 6;

/// Largest payload a single envelope may announce.
pub const MAX_PAYLOAD: usize = 1454;

pub const FLAG_REPLY: u8 = 0x80;
pub const FLAG_ERROR: u8 = 0x40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub code: u8,
    pub flags: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn request(code: u8, seq: u8, payload: Vec<u8>) -> Self {
        Envelope {
            code,
            flags: 0,
            seq,
            payload,
        }
    }

    pub fn reply(code: u8, seq: u8, payload: Vec<u8>) -> Self {
        Envelope {
            code,
            flags: FLAG_REPLY,
            seq,
            payload,
        }
    }

    pub fn with_error(mut self) -> Self {
        self.flags |= FLAG_ERROR;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR != 0
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::TooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&[self.code, self.flags, self.seq, 0]);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode the first envelope in `buf`. `Ok(None)` means more bytes are
    /// needed; otherwise returns the envelope and the bytes it used.
    pub fn decode(buf: &[u8]) -> Result<Option<(Envelope, usize)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = read_u16(buf, 4) as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::Malformed("envelope length"));
        }
        let end = HEADER_LEN + len;
        if buf.len() < end {
            return Ok(None);
        }
        let env = Envelope {
            code: buf[0],
            flags: buf[1],
            seq: buf[2],
            payload: buf[HEADER_LEN..end].to_vec(),
        };
        Ok(Some((env, end)))
    }
}

/// Per-client request numbering: starts at 1 and never hands out 0.
#[derive(Debug, Default, Clone)]
pub struct Sequence(u8);

impl Sequence {
    pub fn next(&mut self) -> u8 {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        self.0
    }
}
