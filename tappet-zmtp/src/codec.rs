//! ZMTP 3.0 frame codec.
//!
//! Wire layout of one frame:
//!
//! ```text
//! flags (1 byte) | size (1 byte, or 8 bytes BE when LONG) | body
//! ```
//!
//! The decoder works directly on the engine's receive buffer. A frame whose
//! header arrived but whose body did not is remembered, so decoding resumes
//! where it stopped on the next readiness event instead of re-parsing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tappet_core::error::TappetError;
use tappet_core::message::Message;
use thiserror::Error;

pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;
const FLAG_RESERVED: u8 = 0xF8;

const SHORT_HEADER: usize = 2;
const LONG_HEADER: usize = 9;

/// Most buffer space reserved ahead of a body that has not arrived yet.
const BODY_RESERVE_LIMIT: usize = 64 * 1024;

/// ZMTP protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZmtpError {
    #[error("Protocol violation: reserved flag bits set ({0:#04x})")]
    ReservedBits(u8),

    #[error("Protocol violation: frame of {size} bytes exceeds limit of {max}")]
    SizeTooLarge { size: u64, max: usize },

    #[error("Protocol violation: {0}")]
    Protocol(&'static str),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Result type alias for ZMTP operations
pub type Result<T> = std::result::Result<T, ZmtpError>;

impl From<ZmtpError> for TappetError {
    fn from(e: ZmtpError) -> Self {
        match e {
            ZmtpError::Handshake(reason) => Self::Handshake(reason),
            ZmtpError::SizeTooLarge { size, max } => Self::MessageTooLarge { size, max },
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// A decoded ZMTP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub flags: u8,
    pub payload: Bytes,
}

impl ZmtpFrame {
    /// Create a data frame
    #[must_use]
    pub const fn data(payload: Bytes, more: bool) -> Self {
        let flags = if more { FLAG_MORE } else { 0 };
        Self { flags, payload }
    }

    /// Create a command frame
    #[must_use]
    pub const fn command(payload: Bytes) -> Self {
        Self {
            flags: FLAG_COMMAND,
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_command(&self) -> bool {
        (self.flags & FLAG_COMMAND) != 0
    }

    /// Append header and body to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_frame(self.flags, &self.payload, dst);
    }
}

/// Append one frame. The LONG flag is derived from the body length.
pub fn encode_frame(flags: u8, body: &[u8], dst: &mut BytesMut) {
    let len = body.len();
    if len <= u8::MAX as usize {
        dst.reserve(SHORT_HEADER + len);
        dst.put_u8(flags & !FLAG_LONG);
        dst.put_u8(len as u8);
    } else {
        dst.reserve(LONG_HEADER + len);
        dst.put_u8(flags | FLAG_LONG);
        dst.put_u64(len as u64);
    }
    dst.extend_from_slice(body);
}

/// Append every frame of `msg`, with MORE on all but the last.
///
/// An empty message has no wire form and is skipped.
pub fn encode_message(msg: &Message, dst: &mut BytesMut) {
    let last = msg.len().saturating_sub(1);
    for (i, frame) in msg.iter().enumerate() {
        let flags = if i < last { FLAG_MORE } else { 0 };
        encode_frame(flags, frame, dst);
    }
}

/// Stateful single-frame decoder.
#[derive(Debug, Default)]
pub struct ZmtpDecoder {
    // Header already consumed, body still incomplete
    pending: Option<(u8, usize)>,
    max_frame_size: Option<usize>,
}

impl ZmtpDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames larger than `max` bytes.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max: Option<usize>) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Decode a single frame from the front of `src`.
    ///
    /// Returns:
    /// - Ok(Some(frame)) → frame decoded, its bytes removed from `src`
    /// - Ok(None) → need more data; any complete header was consumed
    /// - Err → protocol violation, the connection must be dropped
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ZmtpFrame>> {
        let (flags, body_len) = match self.pending {
            Some(header) => header,
            None => match self.decode_header(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        if src.len() < body_len {
            self.pending = Some((flags, body_len));
            // The declared size is untrusted: grow as bytes arrive
            src.reserve((body_len - src.len()).min(BODY_RESERVE_LIMIT));
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(body_len).freeze();
        Ok(Some(ZmtpFrame { flags, payload }))
    }

    fn decode_header(&self, src: &mut BytesMut) -> Result<Option<(u8, usize)>> {
        if src.len() < SHORT_HEADER {
            return Ok(None);
        }

        let flags = src[0];
        if (flags & FLAG_RESERVED) != 0 {
            return Err(ZmtpError::ReservedBits(flags));
        }

        let is_long = (flags & FLAG_LONG) != 0;
        let header_len = if is_long { LONG_HEADER } else { SHORT_HEADER };
        if src.len() < header_len {
            return Ok(None);
        }

        let size = if is_long {
            let mut raw = &src[1..LONG_HEADER];
            raw.get_u64()
        } else {
            u64::from(src[1])
        };

        // MSB must be zero in ZMTP 3.x
        if size > i64::MAX as u64 {
            return Err(ZmtpError::Protocol("negative frame size"));
        }
        let limit = self.max_frame_size.unwrap_or(usize::MAX);
        if size > limit as u64 {
            return Err(ZmtpError::SizeTooLarge { size, max: limit });
        }

        src.advance(header_len);
        // size <= limit <= usize::MAX
        Ok(Some((flags & !FLAG_LONG, size as usize)))
    }
}

/// What the message decoder produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    Command(Bytes),
}

/// Groups decoded frames into messages.
///
/// Data frames accumulate until one arrives without MORE. Command frames are
/// returned on their own and must not appear in the middle of a message.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    frames: ZmtpDecoder,
    partial: Message,
}

impl MessageDecoder {
    #[must_use]
    pub fn new(max_frame_size: Option<usize>) -> Self {
        Self {
            frames: ZmtpDecoder::new().with_max_frame_size(max_frame_size),
            partial: Message::new(),
        }
    }

    /// Decode the next complete message or command from `src`.
    ///
    /// # Errors
    ///
    /// Any framing violation from [`ZmtpDecoder::decode`], or a command frame
    /// interleaved with a multipart message.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        while let Some(frame) = self.frames.decode(src)? {
            if frame.is_command() {
                if !self.partial.is_empty() {
                    return Err(ZmtpError::Protocol("command inside multipart message"));
                }
                if frame.more() {
                    return Err(ZmtpError::Protocol("command frame with MORE flag"));
                }
                return Ok(Some(Decoded::Command(frame.payload)));
            }

            let more = frame.more();
            self.partial.push_back(frame.payload);
            if !more {
                return Ok(Some(Decoded::Message(std::mem::take(&mut self.partial))));
            }
        }
        Ok(None)
    }

    /// True while a multipart message is partially received.
    #[must_use]
    pub fn in_message(&self) -> bool {
        !self.partial.is_empty()
    }
}
