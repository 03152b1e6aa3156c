//! Bosch OIP session frames
//!
//! Every OIP frame starts with a 16-byte header:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0-3:   Message type (uint32 little-endian)                 │
//! │ Byte 4-7:   Total frame length incl. header (uint32 LE)         │
//! │ Byte 8-15:  Reserved (zero)                                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Body (strings are uint32 LE length + bytes)                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session protocol has no application-level acknowledgement the gateway
//! acts on; responses are parsed only for diagnostics.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// OIP header size
pub const HEADER_SIZE: usize = 16;

/// Message type: login
pub const TYPE_LOGIN: u32 = 0x0044_7002;

/// Message type: start call
pub const TYPE_START_CALL: u32 = 0x0044_7003;

/// Message type: keepalive
pub const TYPE_KEEPALIVE: u32 = 0x0044_7027;

/// Start-call frame for the `ALL` zone group
pub const START_CALL: &[u8] = &[
    0x03, 0x70, 0x44, 0x00, 0x39, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
    0x41, 0x4c, 0x4c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x08, 0x00, 0x00, 0x00, 0x78, 0x69, 0x61, 0x6f, 0x66, 0x61, 0x6e, 0x67,
];

/// Keepalive frame (header only)
pub const KEEPALIVE: &[u8] = &[
    0x27, 0x70, 0x44, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Parsed OIP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OipHeader {
    pub message_type: u32,
    pub length: u32,
}

impl OipHeader {
    /// Parse the header at the start of `buf`
    pub fn parse(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                have: buf.remaining(),
            });
        }
        let message_type = buf.get_u32_le();
        let length = buf.get_u32_le();
        Ok(Self {
            message_type,
            length,
        })
    }

    /// Human-readable name for known message types
    pub fn type_name(&self) -> &'static str {
        match self.message_type {
            TYPE_LOGIN => "login",
            TYPE_START_CALL => "start-call",
            TYPE_KEEPALIVE => "keepalive",
            _ => "unknown",
        }
    }
}

fn frame(message_type: u32, body: &[u8]) -> Result<Bytes> {
    let total = HEADER_SIZE + body.len();
    let length = u32::try_from(total).map_err(|_| Error::FieldTooLarge {
        field: "frame length",
        value: total,
    })?;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32_le(message_type);
    buf.put_u32_le(length);
    buf.put_bytes(0, 8);
    buf.put_slice(body);
    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, field: &'static str, value: &str) -> Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| Error::FieldTooLarge {
        field,
        value: value.len(),
    })?;
    buf.put_u32_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Build a login frame carrying the given credentials
pub fn login_frame(user: &str, passwd: &str) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(8 + user.len() + passwd.len());
    put_string(&mut body, "user", user)?;
    put_string(&mut body, "passwd", passwd)?;
    frame(TYPE_LOGIN, &body)
}

pub fn start_call_frame() -> Bytes {
    Bytes::from_static(START_CALL)
}

pub fn keepalive_frame() -> Bytes {
    Bytes::from_static(KEEPALIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_LOGIN: &[u8] = b"\x02\x70\x44\x00\x22\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x05\x00\x00\x00admin\x05\x00\x00\x00admin";

    #[test]
    fn test_login_matches_legacy_frame() {
        let login = login_frame("admin", "admin").unwrap();
        assert_eq!(login.as_ref(), LEGACY_LOGIN);
    }

    #[test]
    fn test_login_embeds_credentials() {
        let login = login_frame("operator", "s3cret").unwrap();
        let header = OipHeader::parse(&login[..]).unwrap();
        assert_eq!(header.message_type, TYPE_LOGIN);
        assert_eq!(header.length as usize, login.len());
        assert_eq!(&login[16..20], &[8, 0, 0, 0]);
        assert_eq!(&login[20..28], b"operator");
        assert_eq!(&login[28..32], &[6, 0, 0, 0]);
        assert_eq!(&login[32..], b"s3cret");
    }

    #[test]
    fn test_fixed_frames_have_consistent_headers() {
        let start = OipHeader::parse(START_CALL).unwrap();
        assert_eq!(start.type_name(), "start-call");
        assert_eq!(start.length as usize, START_CALL.len());

        let keepalive = OipHeader::parse(KEEPALIVE).unwrap();
        assert_eq!(keepalive.type_name(), "keepalive");
        assert_eq!(keepalive.length as usize, HEADER_SIZE);
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            OipHeader::parse(&[0x27, 0x70][..]),
            Err(Error::BufferTooSmall { needed: 16, have: 2 })
        ));
    }
}
