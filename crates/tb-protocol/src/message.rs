//! Frame values exchanged over a session connection
//!
//! A session carries three kinds of frames:
//!
//! 1. `Data`: raw terminal bytes. Input flows towards the remote process,
//!    output flows back. Payloads are opaque to the protocol.
//! 2. `Resize`: the terminal surface's size in character cells.
//! 3. `Control`: a one-byte code followed by a code-specific body. The
//!    well-known codes are listed on [`ControlCode`]; unknown codes are valid
//!    on the wire and left to the receiver to ignore.
//!
//! Frames are plain values: built once per I/O event and never mutated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Malformed;
use crate::frame::{FrameHeader, FrameTag, HEADER_SIZE};

/// Current protocol version, sent in `HELLO`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Terminal dimensions in character cells. Both are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTerminalSize")]
pub struct TerminalSize {
    cols: u16,
    rows: u16,
}

impl TerminalSize {
    /// The classic 80x24 terminal
    pub const DEFAULT: TerminalSize = TerminalSize { cols: 80, rows: 24 };

    /// Create a terminal size, rejecting zero dimensions
    pub fn new(cols: u16, rows: u16) -> Option<Self> {
        if cols == 0 || rows == 0 {
            return None;
        }
        Some(Self { cols, rows })
    }

    /// Number of columns
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Number of rows
    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Unchecked serde form of [`TerminalSize`]
#[derive(Deserialize)]
struct RawTerminalSize {
    cols: u16,
    rows: u16,
}

impl TryFrom<RawTerminalSize> for TerminalSize {
    type Error = String;

    fn try_from(raw: RawTerminalSize) -> Result<Self, Self::Error> {
        TerminalSize::new(raw.cols, raw.rows).ok_or_else(|| {
            format!(
                "terminal size {}x{} must have non-zero columns and rows",
                raw.cols, raw.rows
            )
        })
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Control message code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCode(pub u8);

impl ControlCode {
    /// Liveness check; the peer answers with `PONG`
    pub const PING: ControlCode = ControlCode(0x01);
    /// Answer to `PING`
    pub const PONG: ControlCode = ControlCode(0x02);
    /// Remote process exited. Body: optional i32 exit status, big-endian
    pub const EXIT: ControlCode = ControlCode(0x03);
    /// Graceful end of the session
    pub const CLOSE: ControlCode = ControlCode(0x04);
    /// Human-readable error. Body: UTF-8 text
    pub const ERROR: ControlCode = ControlCode(0x05);
    /// Protocol version and maximum frame size of the sender
    pub const HELLO: ControlCode = ControlCode(0x06);

    /// Get the raw code
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::PING => "ping",
            Self::PONG => "pong",
            Self::EXIT => "exit",
            Self::CLOSE => "close",
            Self::ERROR => "error",
            Self::HELLO => "hello",
            ControlCode(other) => return write!(f, "control-0x{:02x}", other),
        };
        f.write_str(name)
    }
}

/// Body of a `HELLO` control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version spoken by the sender
    pub version: u8,
    /// Largest payload the sender accepts
    pub max_frame_size: u32,
}

impl Hello {
    /// Encoded body length
    pub const LEN: usize = 5;

    fn to_bytes(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u8(self.version);
        buf.put_u32(self.max_frame_size);
        buf.freeze()
    }

    fn parse(mut body: &[u8]) -> Option<Self> {
        if body.len() != Self::LEN {
            return None;
        }
        Some(Self {
            version: body.get_u8(),
            max_frame_size: body.get_u32(),
        })
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Terminal bytes
    Data(Bytes),
    /// Terminal resize
    Resize(TerminalSize),
    /// Control message
    Control {
        /// Control code
        code: ControlCode,
        /// Code-specific body
        payload: Bytes,
    },
}

impl Frame {
    /// Build a control frame
    pub fn control(code: ControlCode, payload: impl Into<Bytes>) -> Self {
        Frame::Control {
            code,
            payload: payload.into(),
        }
    }

    /// `PING` carrying an opaque token the peer echoes back
    pub fn ping(token: u64) -> Self {
        Self::control(ControlCode::PING, Bytes::copy_from_slice(&token.to_be_bytes()))
    }

    /// `PONG` echoing a ping's body
    pub fn pong(token: Bytes) -> Self {
        Self::control(ControlCode::PONG, token)
    }

    /// `EXIT` with the remote process's status, if known
    pub fn exit(code: Option<i32>) -> Self {
        let body = match code {
            Some(code) => Bytes::copy_from_slice(&code.to_be_bytes()),
            None => Bytes::new(),
        };
        Self::control(ControlCode::EXIT, body)
    }

    /// `CLOSE`
    pub fn close() -> Self {
        Self::control(ControlCode::CLOSE, Bytes::new())
    }

    /// `ERROR` with a message
    pub fn error(message: &str) -> Self {
        Self::control(ControlCode::ERROR, Bytes::copy_from_slice(message.as_bytes()))
    }

    /// `HELLO` advertising our version and maximum frame size
    pub fn hello(max_frame_size: usize) -> Self {
        let hello = Hello {
            version: PROTOCOL_VERSION,
            max_frame_size: u32::try_from(max_frame_size).unwrap_or(u32::MAX),
        };
        Self::control(ControlCode::HELLO, hello.to_bytes())
    }

    /// Get the tag for this frame
    pub fn tag(&self) -> FrameTag {
        match self {
            Frame::Data(_) => FrameTag::Data,
            Frame::Resize(_) => FrameTag::Resize,
            Frame::Control { .. } => FrameTag::Control,
        }
    }

    /// Length of the encoded payload, excluding the header
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Data(data) => data.len(),
            Frame::Resize(_) => 4,
            Frame::Control { payload, .. } => 1 + payload.len(),
        }
    }

    /// Length of the frame on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// Total and deterministic; size limits are enforced by the codec.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        FrameHeader::new(self.tag(), self.payload_len() as u32).encode(dst);
        match self {
            Frame::Data(data) => dst.extend_from_slice(data),
            Frame::Resize(size) => {
                dst.put_u16(size.cols);
                dst.put_u16(size.rows);
            }
            Frame::Control { code, payload } => {
                dst.put_u8(code.as_u8());
                dst.extend_from_slice(payload);
            }
        }
    }

    /// Build a frame from a decoded tag and its complete payload
    pub fn from_payload(tag: FrameTag, mut payload: Bytes) -> Result<Self, Malformed> {
        match tag {
            FrameTag::Data => Ok(Frame::Data(payload)),
            FrameTag::Resize => {
                if payload.len() != 4 {
                    return Err(Malformed::ResizeLength(payload.len()));
                }
                let cols = payload.get_u16();
                let rows = payload.get_u16();
                TerminalSize::new(cols, rows)
                    .map(Frame::Resize)
                    .ok_or(Malformed::ZeroSize { cols, rows })
            }
            FrameTag::Control => {
                if payload.is_empty() {
                    return Err(Malformed::MissingControlCode);
                }
                let code = ControlCode(payload.get_u8());
                Ok(Frame::Control { code, payload })
            }
        }
    }

    /// Split terminal bytes into `Data` frames of at most `max` bytes each.
    ///
    /// Yields nothing for empty input.
    pub fn data_chunks(data: Bytes, max: usize) -> DataChunks {
        DataChunks {
            rest: data,
            max: max.max(1),
        }
    }

    /// The body of a `HELLO` frame
    pub fn as_hello(&self) -> Option<Hello> {
        match self {
            Frame::Control { code, payload } if *code == ControlCode::HELLO => {
                Hello::parse(payload)
            }
            _ => None,
        }
    }

    /// The exit status carried by an `EXIT` frame.
    ///
    /// `Some(None)` is an `EXIT` without a known status.
    pub fn as_exit(&self) -> Option<Option<i32>> {
        match self {
            Frame::Control { code, payload } if *code == ControlCode::EXIT => {
                let status = <[u8; 4]>::try_from(&payload[..])
                    .ok()
                    .map(i32::from_be_bytes);
                Some(status)
            }
            _ => None,
        }
    }
}

/// Iterator returned by [`Frame::data_chunks`]
#[derive(Debug)]
pub struct DataChunks {
    rest: Bytes,
    max: usize,
}

impl Iterator for DataChunks {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.rest.is_empty() {
            return None;
        }
        let take = self.rest.len().min(self.max);
        Some(Frame::Data(self.rest.split_to(take)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_rejects_zero() {
        assert!(TerminalSize::new(0, 24).is_none());
        assert!(TerminalSize::new(80, 0).is_none());
        assert_eq!(
            TerminalSize::new(80, 24),
            Some(TerminalSize::DEFAULT)
        );
    }

    #[test]
    fn test_resize_wire_layout() {
        let mut buf = BytesMut::new();
        Frame::Resize(TerminalSize::new(132, 43).unwrap()).encode(&mut buf);
        assert_eq!(&buf[..], &[0x02, 0, 0, 0, 4, 0x00, 0x84, 0x00, 0x2b]);
    }

    #[test]
    fn test_resize_zero_is_malformed() {
        let result = Frame::from_payload(FrameTag::Resize, Bytes::from_static(&[0, 0, 0, 24]));
        assert_eq!(result, Err(Malformed::ZeroSize { cols: 0, rows: 24 }));
    }

    #[test]
    fn test_control_without_code_is_malformed() {
        let result = Frame::from_payload(FrameTag::Control, Bytes::new());
        assert_eq!(result, Err(Malformed::MissingControlCode));
    }

    #[test]
    fn test_unknown_control_code_is_accepted() {
        let frame = Frame::from_payload(FrameTag::Control, Bytes::from_static(&[0x7f, 1, 2]))
            .unwrap();
        assert_eq!(
            frame,
            Frame::control(ControlCode(0x7f), Bytes::from_static(&[1, 2]))
        );
        assert_eq!(ControlCode(0x7f).to_string(), "control-0x7f");
    }

    #[test]
    fn test_data_chunks_respect_max() {
        let data = Bytes::from_static(b"abcdefghij");
        let chunks: Vec<Frame> = Frame::data_chunks(data, 4).collect();
        assert_eq!(
            chunks,
            vec![
                Frame::Data(Bytes::from_static(b"abcd")),
                Frame::Data(Bytes::from_static(b"efgh")),
                Frame::Data(Bytes::from_static(b"ij")),
            ]
        );
        assert_eq!(Frame::data_chunks(Bytes::new(), 4).count(), 0);
    }

    #[test]
    fn test_hello_body() {
        let frame = Frame::hello(4096);
        assert_eq!(
            frame.as_hello(),
            Some(Hello {
                version: PROTOCOL_VERSION,
                max_frame_size: 4096
            })
        );
        assert_eq!(Frame::close().as_hello(), None);
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(Frame::exit(Some(-2)).as_exit(), Some(Some(-2)));
        assert_eq!(Frame::exit(None).as_exit(), Some(None));
        assert_eq!(Frame::Data(Bytes::new()).as_exit(), None);
    }

    #[test]
    fn test_terminal_size_serde() {
        let size = TerminalSize::new(80, 24).unwrap();
        let json = serde_json::to_string(&size).unwrap();
        assert_eq!(json, r#"{"cols":80,"rows":24}"#);

        let parsed: TerminalSize = serde_json::from_str(r#"{"cols":132,"rows":43}"#).unwrap();
        assert_eq!((parsed.cols(), parsed.rows()), (132, 43));
    }

    #[test]
    fn test_terminal_size_serde_rejects_zero() {
        let result = serde_json::from_str::<TerminalSize>(r#"{"cols":0,"rows":24}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("non-zero"), "unexpected error: {}", err);
    }
}
