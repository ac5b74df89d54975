/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Tokio codec for FIX message framing.
//!
//! The codec cuts complete messages out of a byte stream using BodyLength
//! and checks the CheckSum field. Framing failures never end the stream:
//! the offending bytes are returned as [`Frame::Garbled`] and the codec
//! resynchronizes on the next `8=FIX`.

use bytes::{BufMut, Bytes, BytesMut};
use fixgate_tagvalue::checksum::{calculate_checksum, parse_checksum};
use memchr::{memchr, memmem};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors that can occur during codec operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The stream ended in the middle of a message.
    #[error("incomplete message")]
    Incomplete,

    /// Invalid BeginString field.
    #[error("invalid begin string: message must start with 8=")]
    InvalidBeginString,

    /// Missing BodyLength field.
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// Invalid BodyLength value.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// No CheckSum field where BodyLength says the body ends.
    #[error("body length does not point at the checksum field")]
    BodyLengthMismatch,

    /// Checksum mismatch.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum.
        calculated: u8,
        /// Declared checksum in message.
        declared: u8,
    },

    /// Message exceeds maximum size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// One unit cut from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, well-framed message.
    Message(Bytes),
    /// Bytes discarded while resynchronizing.
    Garbled {
        /// The discarded bytes.
        data: Bytes,
        /// Why they were discarded.
        error: CodecError,
    },
}

/// SOH delimiter.
const SOH: u8 = 0x01;

/// Start of every frame, used to resynchronize.
const BEGIN_MARKER: &[u8] = b"8=FIX";

/// Length of `10=NNN<SOH>`.
const TRAILER_LEN: usize = 7;

/// Longest `8=...<SOH>` prefix accepted before giving up on a frame.
const MAX_BEGIN_STRING_LEN: usize = 32;

/// Tokio codec for FIX message framing.
#[derive(Debug, Clone)]
pub struct FixCodec {
    /// Maximum message size in bytes, zero for no limit.
    max_message_size: usize,
    /// Whether to validate checksums.
    validate_checksum: bool,
}

impl FixCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1MB
            validate_checksum: true,
        }
    }

    /// Sets the maximum message size; zero disables the limit.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether to validate checksums.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    /// Returns the length of the frame at the start of `src`.
    ///
    /// `src` starts with `8=`. Returns `Ok(None)` when more bytes are needed.
    fn frame_length(&self, src: &mut BytesMut) -> Result<Option<usize>, CodecError> {
        let Some(first_soh) = memchr(SOH, src) else {
            if src.len() > MAX_BEGIN_STRING_LEN {
                return Err(CodecError::InvalidBeginString);
            }
            return Ok(None);
        };

        let body_len_start = first_soh + 1;
        if src.len() < body_len_start + 2 {
            return Ok(None);
        }
        if &src[body_len_start..body_len_start + 2] != b"9=" {
            return Err(CodecError::MissingBodyLength);
        }

        let digits_start = body_len_start + 2;
        let Some(digits_len) = memchr(SOH, &src[digits_start..]) else {
            if src.len() - digits_start > 10 {
                return Err(CodecError::InvalidBodyLength);
            }
            return Ok(None);
        };
        let digits = &src[digits_start..digits_start + digits_len];
        if digits.is_empty() || digits.len() > 10 || !digits.iter().all(u8::is_ascii_digit) {
            return Err(CodecError::InvalidBodyLength);
        }
        let body_length = digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));

        let body_start = digits_start + digits_len + 1;
        let total_length = body_start + body_length + TRAILER_LEN;
        if self.max_message_size > 0 && total_length > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: total_length,
                max_size: self.max_message_size,
            });
        }
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let trailer = &src[total_length - TRAILER_LEN..total_length];
        if &trailer[..3] != b"10=" || trailer[TRAILER_LEN - 1] != SOH {
            return Err(CodecError::BodyLengthMismatch);
        }
        Ok(Some(total_length))
    }

    fn check_frame(&self, frame: &[u8]) -> Result<(), CodecError> {
        if !self.validate_checksum {
            return Ok(());
        }
        let checksum_start = frame.len() - TRAILER_LEN;
        let declared = parse_checksum(&frame[checksum_start + 3..frame.len() - 1])
            .ok_or(CodecError::BodyLengthMismatch)?;
        let calculated = calculate_checksum(&frame[..checksum_start]);
        if calculated != declared {
            return Err(CodecError::ChecksumMismatch {
                calculated,
                declared,
            });
        }
        Ok(())
    }
}

impl Default for FixCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset of the next plausible frame start after the first byte.
///
/// When none is found, a tail short enough to be the beginning of a
/// marker is kept.
fn resync_point(src: &[u8]) -> usize {
    match memmem::find(&src[1..], BEGIN_MARKER) {
        Some(pos) => pos + 1,
        None => src.len().saturating_sub(BEGIN_MARKER.len() - 1),
    }
}

impl Decoder for FixCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let error = if src.starts_with(b"8=") {
            match self.frame_length(src) {
                Ok(None) => return Ok(None),
                Ok(Some(length)) => {
                    let frame = src.split_to(length).freeze();
                    return Ok(Some(match self.check_frame(&frame) {
                        Ok(()) => Frame::Message(frame),
                        Err(error) => Frame::Garbled { data: frame, error },
                    }));
                }
                Err(error) => error,
            }
        } else if src.len() < 2 && src[0] == b'8' {
            return Ok(None);
        } else {
            CodecError::InvalidBeginString
        };

        let skip = resync_point(src);
        if skip == 0 {
            return Ok(None);
        }
        Ok(Some(Frame::Garbled {
            data: src.split_to(skip).freeze(),
            error,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Ok(Some(Frame::Garbled {
                data: buf.split().freeze(),
                error: CodecError::Incomplete,
            })),
        }
    }
}

impl Encoder<&[u8]> for FixCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(item);
        Ok(())
    }
}

impl Encoder<Bytes> for FixCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
