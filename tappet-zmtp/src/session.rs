//! Sans-IO ZMTP session.
//!
//! The session owns no socket. The engine appends received bytes to an input
//! buffer, calls into the session, and writes whatever the session appended
//! to the output buffer. Bytes not consumed stay in the input buffer.
//!
//! A raw session (ROUTER raw mode) speaks no ZMTP at all: the handshake
//! completes without exchanging bytes, every chunk of input is one message
//! and outgoing frames are written as they are.

use crate::codec::{
    encode_message, Decoded, MessageDecoder, Result, ZmtpDecoder, ZmtpError, ZmtpFrame,
};
use crate::command::{self, ZmtpCommand};
use crate::greeting::{Mechanism as GreetingMechanism, ZmtpGreeting, GREETING_SIZE};
use crate::mechanism::null::NullMechanism;
use crate::mechanism::Mechanism;
use bytes::{Bytes, BytesMut};
use tappet_core::message::Message;
use tappet_core::socket_type::SocketType;
use tracing::trace;

// READY carries at most a socket type and a 255-byte identity
const MAX_HANDSHAKE_FRAME: usize = 64 * 1024;

/// Peer metadata learned from the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub peer_socket_type: SocketType,
    pub peer_identity: Option<Bytes>,
}

enum State {
    Greeting,
    Handshake {
        decoder: ZmtpDecoder,
        mechanism: Box<dyn Mechanism>,
    },
    Active,
    RawPending,
    Raw,
}

/// One connection's protocol state.
pub struct ZmtpSession {
    state: State,
    local_socket_type: SocketType,
    local_identity: Option<Bytes>,
    messages: MessageDecoder,
}

impl ZmtpSession {
    #[must_use]
    pub fn new(
        local_socket_type: SocketType,
        local_identity: Option<Bytes>,
        max_frame_size: Option<usize>,
    ) -> Self {
        Self {
            state: State::Greeting,
            local_socket_type,
            local_identity,
            messages: MessageDecoder::new(max_frame_size),
        }
    }

    /// Session for a peer that exchanges unframed bytes.
    #[must_use]
    pub fn raw(local_socket_type: SocketType) -> Self {
        Self {
            state: State::RawPending,
            local_socket_type,
            local_identity: None,
            messages: MessageDecoder::new(None),
        }
    }

    /// Append our greeting. Both sides send it as soon as the stream is up.
    pub fn start(&self, out: &mut BytesMut) {
        if !self.is_raw() {
            ZmtpGreeting::encode(false, out);
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, State::Active | State::Raw)
    }

    #[must_use]
    pub const fn is_raw(&self) -> bool {
        matches!(self.state, State::RawPending | State::Raw)
    }

    /// Append `msg` in this session's wire format.
    pub fn encode(&self, msg: &Message, out: &mut BytesMut) {
        if self.is_raw() {
            for frame in msg.iter() {
                out.extend_from_slice(frame);
            }
        } else {
            encode_message(msg, out);
        }
    }

    /// Advance the handshake with the bytes in `input`.
    ///
    /// Returns `Ok(Some(..))` exactly once, when the peer's READY was
    /// accepted. Bytes after the READY stay in `input` for [`decode`](Self::decode).
    ///
    /// # Errors
    ///
    /// `Handshake` on a bad greeting, unsupported mechanism, malformed READY
    /// or incompatible peer socket type.
    pub fn handshake(
        &mut self,
        input: &mut BytesMut,
        out: &mut BytesMut,
    ) -> Result<Option<HandshakeResult>> {
        loop {
            match &mut self.state {
                State::Greeting => {
                    if input.len() < GREETING_SIZE {
                        return Ok(None);
                    }
                    let raw = input.split_to(GREETING_SIZE);
                    let greeting = ZmtpGreeting::parse(&raw)?;
                    if greeting.mechanism != GreetingMechanism::Null {
                        return Err(ZmtpError::Handshake(format!(
                            "unsupported mechanism {:?}",
                            greeting.mechanism
                        )));
                    }
                    trace!(
                        major = greeting.major,
                        minor = greeting.minor,
                        "[SESSION] greeting accepted"
                    );

                    let mut mechanism: Box<dyn Mechanism> = Box::new(NullMechanism::new(
                        self.local_socket_type,
                        self.local_identity.clone(),
                    ));
                    mechanism.write_outbound(out);
                    self.state = State::Handshake {
                        decoder: ZmtpDecoder::new().with_max_frame_size(Some(MAX_HANDSHAKE_FRAME)),
                        mechanism,
                    };
                }
                State::Handshake { decoder, mechanism } => {
                    let Some(frame) = decoder.decode(input)? else {
                        return Ok(None);
                    };
                    mechanism.on_inbound(&frame)?;
                    mechanism.write_outbound(out);
                    if !mechanism.is_done() {
                        continue;
                    }

                    let peer_socket_type = mechanism
                        .peer_socket_type()
                        .ok_or_else(|| ZmtpError::Handshake("peer socket type missing".into()))?;
                    if !self.local_socket_type.is_compatible(peer_socket_type) {
                        return Err(ZmtpError::Handshake(format!(
                            "incompatible socket types: {} cannot talk to {}",
                            self.local_socket_type, peer_socket_type
                        )));
                    }

                    let result = HandshakeResult {
                        peer_socket_type,
                        peer_identity: mechanism.peer_identity(),
                    };
                    self.state = State::Active;
                    return Ok(Some(result));
                }
                State::RawPending => {
                    self.state = State::Raw;
                    return Ok(Some(HandshakeResult {
                        peer_socket_type: self.local_socket_type,
                        peer_identity: None,
                    }));
                }
                State::Active | State::Raw => {
                    return Err(ZmtpError::Protocol("handshake already complete"));
                }
            }
        }
    }

    /// Decode the next application message from `input`.
    ///
    /// PING is answered with PONG into `out`; other commands are ignored.
    ///
    /// # Errors
    ///
    /// Any framing violation. The connection must be dropped.
    pub fn decode(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<Option<Message>> {
        match self.state {
            State::Active => {}
            State::Raw if input.is_empty() => return Ok(None),
            State::Raw => return Ok(Some(Message::from(input.split().freeze()))),
            _ => return Err(ZmtpError::Protocol("data before handshake")),
        }
        loop {
            match self.messages.decode(input)? {
                None => return Ok(None),
                Some(Decoded::Message(msg)) => return Ok(Some(msg)),
                Some(Decoded::Command(body)) => {
                    let cmd = ZmtpCommand::parse(&body)?;
                    if cmd.is(command::PING) {
                        ZmtpFrame::command(command::build_pong(&cmd)).encode(out);
                    } else {
                        trace!(
                            command = %String::from_utf8_lossy(&cmd.name),
                            "[SESSION] ignoring command"
                        );
                    }
                }
            }
        }
    }
}
