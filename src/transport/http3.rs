//! HTTP/3 frame and varint codec (spec §6) — "for reference only in this
//! core": a pure-function encoder/decoder with no QUIC transport behind it.
//! Nothing else in the crate depends on this module; it exists so the
//! byte-exact wire format named in the spec has an executable, testable
//! form.
//!
//! The varint length field is encoded RFC 9114-conformant (not the fixed
//! 16-bit field the source used) per the Open Questions remediation.

use crate::common::error::{Error, Result};

/// HTTP/3 frame types (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    CancelPush,
    Settings,
    PushPromise,
    GoAway,
    MaxPushId,
    Unknown(u64),
}

impl FrameType {
    pub fn code(self) -> u64 {
        match self {
            FrameType::Data => 0x00,
            FrameType::Headers => 0x01,
            FrameType::CancelPush => 0x03,
            FrameType::Settings => 0x04,
            FrameType::PushPromise => 0x05,
            FrameType::GoAway => 0x07,
            FrameType::MaxPushId => 0x0D,
            FrameType::Unknown(c) => c,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            0x00 => FrameType::Data,
            0x01 => FrameType::Headers,
            0x03 => FrameType::CancelPush,
            0x04 => FrameType::Settings,
            0x05 => FrameType::PushPromise,
            0x07 => FrameType::GoAway,
            0x0D => FrameType::MaxPushId,
            other => FrameType::Unknown(other),
        }
    }
}

/// Unidirectional stream types (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
}

impl StreamType {
    pub fn code(self) -> u64 {
        match self {
            StreamType::Control => 0x00,
            StreamType::Push => 0x01,
            StreamType::QpackEncoder => 0x02,
            StreamType::QpackDecoder => 0x03,
        }
    }
}

/// RFC 9114 error codes, `0x100..0x110`.
pub const H3_NO_ERROR: u64 = 0x100;
pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;
pub const H3_INTERNAL_ERROR: u64 = 0x102;
pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x104;
pub const H3_FRAME_UNEXPECTED: u64 = 0x105;
pub const H3_FRAME_ERROR: u64 = 0x106;
pub const H3_EXCESSIVE_LOAD: u64 = 0x107;
pub const H3_ID_ERROR: u64 = 0x108;
pub const H3_SETTINGS_ERROR: u64 = 0x109;
pub const H3_MISSING_SETTINGS: u64 = 0x10A;
pub const H3_REQUEST_REJECTED: u64 = 0x10B;
pub const H3_REQUEST_CANCELLED: u64 = 0x10C;
pub const H3_REQUEST_INCOMPLETE: u64 = 0x10D;
pub const H3_MESSAGE_ERROR: u64 = 0x10E;
pub const H3_CONNECT_ERROR: u64 = 0x10F;
pub const H3_VERSION_FALLBACK: u64 = 0x110;

/// Default SETTINGS values (spec §6).
pub const QPACK_MAX_TABLE_CAPACITY: u64 = 4096;
pub const MAX_FIELD_SECTION_SIZE: u64 = 16384;
pub const QPACK_BLOCKED_STREAMS: u64 = 100;

/// Decodes a QUIC-style variable-length integer from the front of `buf`,
/// returning the value and number of bytes consumed. Length is determined
/// by the high two bits of the first byte: `00`→1 byte (6-bit value),
/// `01`→2 bytes (14-bit), `10`→4 bytes (30-bit), `11`→8 bytes (62-bit).
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let first = *buf.first().ok_or_else(|| Error::protocol("HTTP/3 varint: empty input"))?;
    let prefix = first >> 6;
    let len = 1usize << prefix;
    if buf.len() < len {
        return Err(Error::protocol("HTTP/3 varint: under-run"));
    }
    let mut value = (first & 0x3F) as u64;
    for &b in &buf[1..len] {
        value = (value << 8) | b as u64;
    }
    Ok((value, len))
}

/// Encodes `value` as a QUIC-style varint, choosing the shortest prefix
/// class that fits (1/2/4/8 bytes for 6/14/30/62-bit values).
pub fn encode_varint(value: u64) -> Result<Vec<u8>> {
    if value <= 0x3F {
        Ok(vec![value as u8])
    } else if value <= 0x3FFF {
        let v = value as u16 | 0x4000;
        Ok(v.to_be_bytes().to_vec())
    } else if value <= 0x3FFF_FFFF {
        let v = value as u32 | 0x8000_0000;
        Ok(v.to_be_bytes().to_vec())
    } else if value <= 0x3FFF_FFFF_FFFF_FFFF {
        let v = value | 0xC000_0000_0000_0000;
        Ok(v.to_be_bytes().to_vec())
    } else {
        Err(Error::protocol("HTTP/3 varint: value too large to encode"))
    }
}

/// A decoded HTTP/3 frame: `type (varint) || length (varint) || payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Frame {
            frame_type: frame_type.code(),
            payload,
        }
    }

    /// Serializes this frame as `varint(type) || varint(len) || payload`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = encode_varint(self.frame_type)?;
        out.extend(encode_varint(self.payload.len() as u64)?);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decodes one frame from the front of `buf`. Returns the frame and
    /// the number of bytes consumed, or an under-run error if `buf` does
    /// not yet contain a complete frame (caller should buffer more bytes
    /// and retry — mirrors the WebSocket decoder's "emit only complete
    /// frames" rule).
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize)> {
        let (frame_type, type_len) = decode_varint(buf)?;
        let (len, len_len) = decode_varint(&buf[type_len..])?;
        let header_len = type_len + len_len;
        let total = header_len + len as usize;
        if buf.len() < total {
            return Err(Error::protocol("HTTP/3 frame: under-run"));
        }
        Ok((
            Frame {
                frame_type,
                payload: buf[header_len..total].to_vec(),
            },
            total,
        ))
    }
}
