//! Frame tags and the `Frame` encode/decode surface.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::{Error, address, address::Addr};

// Tag literals, matched by exact-length prefix compare. Lengths mirror the
// original implementation's `memcmp` call sites, trailing NUL included
// wherever the source includes it.
const ATTACH: &[u8] = b"ATTACH\0";
const PING: &[u8] = b"PING\0";
const PING_RESPONSE: &[u8] = b"PINGRESPONSE\0";
const TRY: &[u8] = b"TRY";
const ATTACH_SUCCESS: &[u8] = b"ATTACHSUCCESS\0";
const NACK: &[u8] = b"NACK";
const REATTACH: &[u8] = b"REATTACH";
const CHILDREN: &[u8] = b"CHILDREN\0";

/// The smallest frame that may be dispatched as `DATA`: a 4-byte start
/// offset with no payload. A buffer shorter than this cannot carry any
/// recognized frame and is dropped.
pub const MIN_FRAME_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame<'a> {
    Attach,
    Ping,
    PingResponse { ping_to_root: f64, is_root: bool },
    Try(Vec<Addr>),
    AttachSuccess,
    Nack { offset: u32 },
    Reattach,
    Children,
    /// `payload` borrows from the inbound datagram when this frame is being
    /// relayed as-is (the common case), and owns a freshly read cache block
    /// when synthesized locally to answer a `NACK`.
    Data { start_offset: u32, payload: Cow<'a, [u8]> },
}

impl<'a> Frame<'a> {
    /// Encodes this frame as a standalone UDP payload.
    pub fn encode(&self, out: &mut BytesMut) {
        out.clear();

        match self {
            Frame::Attach => out.extend_from_slice(ATTACH),
            Frame::Ping => out.extend_from_slice(PING),
            Frame::PingResponse { ping_to_root, is_root } => {
                out.extend_from_slice(PING_RESPONSE);
                out.put_f64_le(*ping_to_root);
                out.put_u8(*is_root as u8);
            }
            Frame::Try(addrs) => {
                out.extend_from_slice(TRY);
                out.put_u8(addrs.len() as u8);

                let mut body = Vec::new();
                for addr in addrs {
                    address::encode(*addr, &mut body);
                }

                out.extend_from_slice(&body);
            }
            Frame::AttachSuccess => out.extend_from_slice(ATTACH_SUCCESS),
            Frame::Nack { offset } => {
                out.extend_from_slice(NACK);
                out.put_u32_le(*offset);
            }
            Frame::Reattach => out.extend_from_slice(REATTACH),
            Frame::Children => out.extend_from_slice(CHILDREN),
            Frame::Data { start_offset, payload } => {
                out.put_u32_le(*start_offset);
                out.extend_from_slice(payload.as_ref());
            }
        }
    }

    /// Decodes a single UDP payload into a frame.
    ///
    /// A buffer shorter than [`MIN_FRAME_LEN`] is rejected outright; it
    /// cannot carry a recognizable `DATA` frame, let alone a tagged one.
    pub fn decode(bytes: &'a [u8]) -> Result<Frame<'a>, Error> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(Error::Truncated);
        }

        if starts_with(bytes, ATTACH) {
            return Ok(Frame::Attach);
        }

        if starts_with(bytes, PING) {
            return Ok(Frame::Ping);
        }

        if starts_with(bytes, PING_RESPONSE) {
            let body = &bytes[PING_RESPONSE.len()..];
            if body.len() < 9 {
                return Err(Error::Truncated);
            }

            let ping_to_root = f64::from_le_bytes(body[0..8].try_into().unwrap());
            let is_root = body[8] != 0;
            return Ok(Frame::PingResponse { ping_to_root, is_root });
        }

        if starts_with(bytes, TRY) {
            return decode_try(bytes);
        }

        if starts_with(bytes, ATTACH_SUCCESS) {
            return Ok(Frame::AttachSuccess);
        }

        if starts_with(bytes, NACK) {
            let body = &bytes[NACK.len()..];
            if body.len() < 4 {
                return Err(Error::Truncated);
            }

            let offset = u32::from_le_bytes(body[0..4].try_into().unwrap());
            return Ok(Frame::Nack { offset });
        }

        if starts_with(bytes, REATTACH) {
            return Ok(Frame::Reattach);
        }

        if starts_with(bytes, CHILDREN) {
            return Ok(Frame::Children);
        }

        let start_offset = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        Ok(Frame::Data { start_offset, payload: Cow::Borrowed(&bytes[4..]) })
    }
}

fn starts_with(bytes: &[u8], tag: &[u8]) -> bool {
    bytes.len() >= tag.len() && &bytes[..tag.len()] == tag
}

fn decode_try(bytes: &[u8]) -> Result<Frame<'_>, Error> {
    // Header is "TRY" + a 1-byte count.
    if bytes.len() < TRY.len() + 1 {
        return Err(Error::Truncated);
    }

    let count = bytes[TRY.len()] as usize;
    let mut cursor = TRY.len() + 1;
    let mut addrs = Vec::with_capacity(count);

    for _ in 0..count {
        let (addr, consumed) = address::decode(&bytes[cursor..])?;
        addrs.push(addr);
        cursor += consumed;
    }

    Ok(Frame::Try(addrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Addr {
        s.parse().unwrap()
    }

    #[test]
    fn round_trips_every_tagged_frame() {
        let mut buf = BytesMut::new();

        for frame in [
            Frame::Attach,
            Frame::Ping,
            Frame::PingResponse { ping_to_root: 12.5, is_root: true },
            Frame::AttachSuccess,
            Frame::Nack { offset: 4096 },
            Frame::Reattach,
            Frame::Children,
        ] {
            frame.encode(&mut buf);
            let decoded = Frame::decode(&buf).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn round_trips_a_try_list_of_arbitrary_size() {
        let addrs = vec![addr("10.0.0.1:9"), addr("10.0.0.2:9"), addr("10.0.0.3:9")];
        let mut buf = BytesMut::new();
        Frame::Try(addrs.clone()).encode(&mut buf);

        match Frame::decode(&buf).unwrap() {
            Frame::Try(decoded) => assert_eq!(decoded, addrs),
            other => panic!("expected Try, got {:?}", other),
        }
    }

    #[test]
    fn empty_try_list_decodes_to_zero_addresses() {
        let mut buf = BytesMut::new();
        Frame::Try(vec![]).encode(&mut buf);

        match Frame::decode(&buf).unwrap() {
            Frame::Try(decoded) => assert!(decoded.is_empty()),
            other => panic!("expected Try, got {:?}", other),
        }
    }

    #[test]
    fn data_is_the_fallback_for_any_unrecognized_tag() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1024);
        buf.extend_from_slice(b"hello world");

        match Frame::decode(&buf).unwrap() {
            Frame::Data { start_offset, payload } => {
                assert_eq!(start_offset, 1024);
                assert_eq!(payload.as_ref(), b"hello world");
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn header_only_data_frame_decodes_with_empty_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);

        match Frame::decode(&buf).unwrap() {
            Frame::Data { start_offset, payload } => {
                assert_eq!(start_offset, 0);
                assert!(payload.is_empty());
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert_eq!(Frame::decode(&[0u8; 3]).unwrap_err(), Error::Truncated);
    }

    #[test]
    fn truncated_try_body_is_rejected() {
        // Claims 2 addresses but only carries one.
        let addrs = vec![addr("10.0.0.1:9")];
        let mut buf = BytesMut::new();
        Frame::Try(addrs).encode(&mut buf);
        buf[3] = 2;

        assert!(Frame::decode(&buf).is_err());
    }
}
