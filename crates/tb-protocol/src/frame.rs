//! Frame header encoding/decoding
//!
//! Every frame starts with a 5-byte header:
//! - tag: 1 byte (u8)
//! - payload_length: 4 bytes (u32, big-endian)
//!
//! The payload follows immediately. Its length is bounded by the maximum
//! frame size configured on the codec, not by the width of the length field.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Malformed;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Smallest maximum payload size a peer may configure
pub const MIN_FRAME_SIZE_LIMIT: usize = 16;

/// Largest maximum payload size a peer may configure (16 MiB)
pub const MAX_FRAME_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Frame type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Terminal bytes (stdin towards the remote, stdout/stderr back)
    Data = 0x01,
    /// Terminal dimensions in character cells
    Resize = 0x02,
    /// Session control message
    Control = 0x03,
}

impl FrameTag {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Resize),
            0x03 => Some(Self::Control),
            _ => None,
        }
    }
}

/// Frame header containing the tag and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Type of the payload
    pub tag: FrameTag,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(tag: FrameTag, payload_length: u32) -> Self {
        Self {
            tag,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.tag.as_u8());
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns `Ok(None)` and consumes nothing if fewer than `HEADER_SIZE`
    /// bytes are buffered. The tag and length are validated before any bytes
    /// are consumed.
    pub fn decode(src: &mut BytesMut, max_payload: usize) -> Result<Option<Self>, Malformed> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let tag = FrameTag::from_u8(src[0]).ok_or(Malformed::UnknownTag(src[0]))?;
        let payload_length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);
        if payload_length as usize > max_payload {
            return Err(Malformed::PayloadTooLarge {
                size: payload_length as usize,
                max: max_payload,
            });
        }

        src.advance(HEADER_SIZE);
        Ok(Some(Self {
            tag,
            payload_length,
        }))
    }
}
