//! Tokio codec for framed session traffic

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, Malformed};
use crate::frame::{FrameHeader, DEFAULT_MAX_FRAME_SIZE};
use crate::message::Frame;

/// Codec for encoding/decoding protocol frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Largest payload accepted in either direction
    max_payload: usize,
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a codec with the default maximum frame size
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom maximum frame size
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload,
            pending_header: None,
        }
    }

    /// Maximum payload size
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn fail(&mut self, src: &mut BytesMut, reason: Malformed) -> CodecError {
        tracing::debug!(%reason, discarded = src.len(), "Discarding undecodable buffer");
        self.pending_header = None;
        src.clear();
        CodecError::Malformed(reason)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Try to decode header if we don't have one
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src, self.max_payload) {
                Ok(Some(h)) => h,
                Ok(None) => return Ok(None), // Need more data
                Err(reason) => return Err(self.fail(src, reason)),
            },
        };

        // Check if we have enough data for the payload
        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            // Save header and wait for more data
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        match Frame::from_payload(header.tag, payload) {
            Ok(frame) => Ok(Some(frame)),
            Err(reason) => Err(self.fail(src, reason)),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = frame.payload_len();
        if size > self.max_payload {
            return Err(CodecError::Oversized {
                size,
                max: self.max_payload,
            });
        }
        frame.encode(dst);
        Ok(())
    }
}

/// Byte cursor for links that deliver the stream in arbitrary chunks.
///
/// WebSocket messages do not line up with frame boundaries: a message may
/// hold half a frame or several. Chunks are appended with [`extend`] and
/// complete frames are pulled out with [`frames`]; a partial frame stays
/// buffered until the rest arrives.
///
/// [`extend`]: FrameBuffer::extend
/// [`frames`]: FrameBuffer::frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Create a buffer that decodes with the given codec
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Lazily decode the complete frames currently buffered.
    ///
    /// The iterator ends when the buffer holds no complete frame, or right
    /// after yielding an error. Calling `frames` again after more bytes
    /// arrive resumes from where decoding stopped.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            inner: self,
            done: false,
        }
    }
}

/// Iterator returned by [`FrameBuffer::frames`]
#[derive(Debug)]
pub struct Frames<'a> {
    inner: &'a mut FrameBuffer,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let FrameBuffer { codec, buffer } = &mut *self.inner;
        match codec.decode(buffer) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::frame::HEADER_SIZE;
    use crate::message::{ControlCode, TerminalSize};

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::Data(Bytes::from("ls -la\n")),
            Frame::Data(Bytes::new()),
            Frame::Resize(TerminalSize::new(80, 24).unwrap()),
            Frame::Resize(TerminalSize::new(u16::MAX, 1).unwrap()),
            Frame::exit(Some(1)),
            Frame::close(),
            Frame::control(ControlCode(0x42), Bytes::from_static(b"opaque")),
        ]
    }

    fn encode_all(frames: &[Frame]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec::new();

        for frame in sample_frames() {
            let mut buf = BytesMut::new();
            codec.encode(frame.clone(), &mut buf).unwrap();

            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
            assert!(buf.is_empty());
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();

        let mut full_buf = BytesMut::new();
        codec
            .encode(Frame::Data(Bytes::from("Hello, world!")), &mut full_buf)
            .unwrap();

        // Header incomplete
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, payload incomplete
        partial.extend_from_slice(&full_buf.split_to(3));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Add the rest
        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, Frame::Data(Bytes::from("Hello, world!")));
    }

    #[test]
    fn test_split_feeding_matches_whole_feeding() {
        let frames = sample_frames();
        let wire = encode_all(&frames);

        for chunk_size in [1, 2, 3, 5, 7, 64] {
            let mut buffer = FrameBuffer::default();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                buffer.extend(chunk);
                for frame in buffer.frames() {
                    decoded.push(frame.unwrap());
                }
            }
            assert_eq!(decoded, frames, "chunk size {}", chunk_size);
            assert_eq!(buffer.buffered(), 0);
        }
    }

    #[test]
    fn test_length_over_max_is_malformed_without_partial_frames() {
        let mut codec = FrameCodec::with_max_payload(8);
        let mut buf = BytesMut::new();
        Frame::Data(Bytes::from_static(b"ok")).encode(&mut buf);
        Frame::Data(Bytes::from_static(b"far too long")).encode(&mut buf);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Data(Bytes::from_static(b"ok")))
        );
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Malformed(Malformed::PayloadTooLarge { size: 12, max: 8 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_malformed_stops_iteration_and_clears_buffer() {
        let mut buffer = FrameBuffer::new(FrameCodec::new());
        let mut wire = encode_all(&[Frame::close()]);
        wire.extend_from_slice(&[0xEE, 0, 0, 0, 1, 0]);
        buffer.extend(&wire);

        let results: Vec<_> = buffer.frames().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &Frame::close());
        assert!(results[1].as_ref().unwrap_err().is_malformed());
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(buffer.frames().count(), 0);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let mut codec = FrameCodec::with_max_payload(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Frame::Data(Bytes::from_static(b"12345")), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::Oversized { size: 5, max: 4 }));
        assert!(buf.is_empty());
    }
}
