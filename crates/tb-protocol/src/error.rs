//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug)]
pub enum CodecError {
    /// The byte stream does not contain a valid frame.
    ///
    /// The decoder discards its buffered bytes when this is returned, so the
    /// connection the bytes came from cannot be resumed.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] Malformed),

    /// A frame handed to the encoder is larger than the configured maximum
    #[error("Frame too large to encode: {size} bytes exceeds maximum of {max} bytes")]
    Oversized { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The specific way a frame was malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    /// Unknown frame tag
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Declared payload length exceeds the maximum frame size
    #[error("payload length {size} exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Resize payload must be exactly four bytes
    #[error("resize payload is {0} bytes, expected 4")]
    ResizeLength(usize),

    /// Resize with a zero column or row count
    #[error("resize to zero size ({cols}x{rows})")]
    ZeroSize { cols: u16, rows: u16 },

    /// Control frame without a code byte
    #[error("control frame is missing its code byte")]
    MissingControlCode,
}

impl CodecError {
    /// Whether this error means the peer sent bytes we cannot parse
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::Malformed(_))
    }
}
