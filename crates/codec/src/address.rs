//! Length-prefixed address serialization used inside `TRY` bodies.
//!
//! Layout: 1-byte type, 1-byte length, then `length` raw bytes. IPv4 is the
//! only address family the overlay runs over, so type is always `4` and
//! length is always `6` (4 octets + 2-byte little-endian port), but the
//! decoder reads the length prefix rather than assuming it, matching the
//! receiver in the original implementation.

use std::net::SocketAddrV4;

use crate::Error;

const ADDR_TYPE_V4: u8 = 4;
const ADDR_BODY_LEN_V4: u8 = 6;

/// A peer identity: an IPv4 address plus a UDP port.
pub type Addr = SocketAddrV4;

/// Appends the length-prefixed encoding of `addr` to `out`.
pub fn encode(addr: Addr, out: &mut Vec<u8>) {
    out.push(ADDR_TYPE_V4);
    out.push(ADDR_BODY_LEN_V4);
    out.extend_from_slice(&addr.ip().octets());
    out.extend_from_slice(&addr.port().to_le_bytes());
}

pub fn encoded_len(_addr: Addr) -> usize {
    2 + ADDR_BODY_LEN_V4 as usize
}

/// Decodes one length-prefixed address starting at `bytes[0]`.
///
/// Returns the address and the number of bytes consumed (`2 + length`).
pub fn decode(bytes: &[u8]) -> Result<(Addr, usize), Error> {
    if bytes.len() < 2 {
        return Err(Error::InvalidAddress);
    }

    let kind = bytes[0];
    let len = bytes[1] as usize;
    if bytes.len() < 2 + len {
        return Err(Error::InvalidAddress);
    }

    if kind != ADDR_TYPE_V4 || len != ADDR_BODY_LEN_V4 as usize {
        return Err(Error::InvalidAddress);
    }

    let body = &bytes[2..2 + len];
    let ip = std::net::Ipv4Addr::new(body[0], body[1], body[2], body[3]);
    let port = u16::from_le_bytes([body[4], body[5]]);

    Ok((SocketAddrV4::new(ip, port), 2 + len))
}
