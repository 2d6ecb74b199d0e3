//! Line codec for chat framing
//!
//! Frames are newline-terminated UTF-8 text lines in both directions. The
//! decoder strips the terminator (and an optional carriage return before
//! it); the encoder appends a single `\n`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length in bytes (matches the 4 KiB read buffer the
/// wire format was designed around)
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Line codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid UTF-8 in line: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },
}

/// Codec turning a byte stream into text lines and back
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_bytes: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Create a codec with a custom maximum line length
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }

    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn take_line(&self, src: &mut BytesMut, len: usize) -> Result<String, CodecError> {
        let mut line = src.split_to(len);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(std::str::from_utf8(&line)?.to_string())
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > self.max_line_bytes {
                    return Err(CodecError::LineTooLong {
                        size: pos,
                        max: self.max_line_bytes,
                    });
                }
                let line = self.take_line(src, pos)?;
                src.advance(1); // consume the newline
                Ok(Some(line))
            }
            None => {
                // Guard against a peer streaming an endless unterminated line
                if src.len() > self.max_line_bytes {
                    return Err(CodecError::LineTooLong {
                        size: src.len(),
                        max: self.max_line_bytes,
                    });
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            // A final line without a terminator is still a line
            None => Ok(Some(self.take_line(src, src.len())?)),
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.as_ref();
        if line.len() > self.max_line_bytes {
            return Err(CodecError::LineTooLong {
                size: line.len(),
                max: self.max_line_bytes,
            });
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
