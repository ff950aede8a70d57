//! Frames and multipart messages.
//!
//! A [`Message`] is an ordered list of frame payloads. The `more` flag that
//! links frames on the wire is not stored: it is implied by position and
//! recomputed by [`Message::frames`], so a message can never carry an
//! inconsistent continuation chain.

use bytes::Bytes;
use smallvec::SmallVec;
use std::io;

/// One frame as seen on the wire: payload plus continuation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub more: bool,
}

impl Frame {
    #[must_use]
    pub fn new(data: impl Into<Bytes>, more: bool) -> Self {
        Self {
            data: data.into(),
            more,
        }
    }
}

/// A multipart message.
///
/// # Examples
///
/// ```
/// use tappet_core::message::Message;
///
/// // ROUTER envelope: [identity] [empty] [data]
/// let mut msg = Message::new()
///     .push_str("request")
///     .push_empty();
/// msg.push_front("client-id");
/// assert_eq!(msg.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: SmallVec<[Bytes; 4]>,
}

impl Message {
    /// Create a new empty message.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: SmallVec::new(),
        }
    }

    /// Create a message from existing frames.
    #[must_use]
    pub fn from_frames(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Append a frame, builder style.
    #[must_use]
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Append a string frame (UTF-8 encoded), builder style.
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.frames.push(Bytes::copy_from_slice(s.as_bytes()));
        self
    }

    /// Append an empty delimiter frame, builder style.
    #[must_use]
    pub fn push_empty(mut self) -> Self {
        self.frames.push(Bytes::new());
        self
    }

    pub fn push_back(&mut self, frame: impl Into<Bytes>) {
        self.frames.push(frame.into());
    }

    /// Prepend a frame (routing identity, delimiter).
    pub fn push_front(&mut self, frame: impl Into<Bytes>) {
        self.frames.insert(0, frame.into());
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.remove(0))
        }
    }

    pub fn pop_back(&mut self) -> Option<Bytes> {
        self.frames.pop()
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Bytes> {
        self.frames.first()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    /// Frame payloads in order.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }

    /// Frames with their wire `more` flag: set on all but the last.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        let last = self.frames.len().saturating_sub(1);
        self.frames.iter().enumerate().map(move |(i, data)| Frame {
            data: data.clone(),
            more: i < last,
        })
    }

    /// Total payload bytes across all frames.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Consume the message and return the frames.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames.into_vec()
    }

    /// Parse a frame as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame doesn't exist or isn't valid UTF-8.
    pub fn parse_frame_str(&self, index: usize) -> io::Result<&str> {
        let frame = self.frames.get(index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "Frame index out of bounds")
        })?;

        std::str::from_utf8(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self::from_frames(frames)
    }
}

impl From<Bytes> for Message {
    fn from(frame: Bytes) -> Self {
        Self::new().push(frame)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::new().push_str(s)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::new().push(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::new().push(data)
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.into_frames()
    }
}

impl FromIterator<Bytes> for Message {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        Self::from_frames(iter)
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = smallvec::IntoIter<[Bytes; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}
