//! The Internet checksum, as used by TCP and UDP over IPv4.
//!
//! The sum runs over a pseudo-header (source address, destination address,
//! zero, protocol, segment length) followed by the segment itself, in 16-bit
//! big-endian words. Carries are folded back into the low 16 bits and the
//! result is inverted.

use std::net::Ipv4Addr;

/// Partial sum of the pseudo-header for a segment of `len` bytes.
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) -> u32 {
    let mut acc = 0u32;
    for pair in src.octets().chunks(2).chain(dst.octets().chunks(2)) {
        acc += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    acc += protocol as u32;
    acc += len as u32;
    acc
}

/// Add `data` to a running one's-complement sum. An odd trailing byte is
/// padded with zero.
pub fn sum(initial: u32, data: &[u8]) -> u32 {
    let mut acc = initial as u64;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        acc += u16::from_be_bytes([w[0], w[1]]) as u64;
    }
    if let [last] = words.remainder() {
        acc += (*last as u64) << 8;
    }
    while acc > 0xffff_ffff {
        acc = (acc & 0xffff_ffff) + (acc >> 32);
    }
    acc as u32
}

/// Fold the carries and invert.
pub fn finish(mut acc: u32) -> u16 {
    while acc > 0xffff {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}

/// Checksum of `segment` (with its checksum field zeroed) between two hosts.
///
/// ```
/// use std::net::Ipv4Addr;
/// use tinywire::wire::checksum;
///
/// let src = Ipv4Addr::new(10, 0, 0, 2);
/// let dst = Ipv4Addr::new(10, 0, 0, 1);
/// let mut seg = vec![0u8; 8];
/// seg[..2].copy_from_slice(&1234u16.to_be_bytes());
/// seg[4..6].copy_from_slice(&8u16.to_be_bytes());
/// let c = checksum::compute(src, dst, 17, &seg);
/// seg[6..8].copy_from_slice(&c.to_be_bytes());
/// assert!(checksum::verify(src, dst, 17, &seg));
/// ```
pub fn compute(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let acc = pseudo_header(src, dst, protocol, segment.len() as u16);
    finish(sum(acc, segment))
}

/// Re-sum a segment including its own checksum field; a valid segment sums
/// to zero.
pub fn verify(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> bool {
    compute(src, dst, protocol, segment) == 0
}
