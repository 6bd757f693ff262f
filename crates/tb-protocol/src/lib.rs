//! tb-protocol: Wire protocol for termbridge sessions
//!
//! This crate defines the length-delimited binary framing used between a
//! terminal surface and the remote process it drives.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{FrameBuffer, FrameCodec, Frames};
pub use error::{CodecError, Malformed};
pub use frame::{
    FrameHeader, FrameTag, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAX_FRAME_SIZE_LIMIT,
    MIN_FRAME_SIZE_LIMIT,
};
pub use message::{ControlCode, DataChunks, Frame, Hello, TerminalSize, PROTOCOL_VERSION};
