use crate::codec::{ZmtpError, ZmtpFrame, FLAG_COMMAND};
use crate::command::{self, ZmtpCommand, PROP_IDENTITY, PROP_SOCKET_TYPE};
use crate::mechanism::{require_command, Mechanism};
use bytes::{Bytes, BytesMut};
use tappet_core::socket_type::SocketType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullState {
    SendReady,
    /// Waiting for peer READY.
    RecvReady,
    Done,
}

/// NULL mechanism (ZMTP 3.0 section "NULL Security Mechanism").
///
/// Both sides send READY right after the greeting and wait for the peer's.
/// An ERROR command from the peer fails the handshake with its reason.
pub struct NullMechanism {
    local_socket_type: SocketType,
    local_identity: Option<Bytes>,
    state: NullState,
    peer_socket_type: Option<SocketType>,
    peer_identity: Option<Bytes>,
}

impl NullMechanism {
    #[must_use]
    pub const fn new(local_socket_type: SocketType, local_identity: Option<Bytes>) -> Self {
        Self {
            local_socket_type,
            local_identity,
            state: NullState::SendReady,
            peer_socket_type: None,
            peer_identity: None,
        }
    }

    fn on_ready(&mut self, cmd: &ZmtpCommand) -> Result<(), ZmtpError> {
        for (name, value) in cmd.properties()? {
            if name.as_ref() == PROP_SOCKET_TYPE.as_bytes() {
                let peer = SocketType::from_name(&value).ok_or_else(|| {
                    ZmtpError::Handshake(format!(
                        "unknown socket type {:?}",
                        String::from_utf8_lossy(&value)
                    ))
                })?;
                self.peer_socket_type = Some(peer);
            } else if name.as_ref() == PROP_IDENTITY.as_bytes() {
                // Empty identity means "none"
                if !value.is_empty() {
                    self.peer_identity = Some(value);
                }
            }
            // Unknown properties are ignored for forward compatibility
        }

        if self.peer_socket_type.is_none() {
            return Err(ZmtpError::Handshake("READY without Socket-Type".into()));
        }
        Ok(())
    }
}

impl Mechanism for NullMechanism {
    fn write_outbound(&mut self, dst: &mut BytesMut) {
        if self.state == NullState::SendReady {
            let body = command::build_ready(
                self.local_socket_type.as_str(),
                self.local_identity.as_deref(),
            );
            ZmtpFrame {
                flags: FLAG_COMMAND,
                payload: body,
            }
            .encode(dst);
            self.state = NullState::RecvReady;
        }
    }

    fn on_inbound(&mut self, frame: &ZmtpFrame) -> Result<(), ZmtpError> {
        require_command(frame)?;
        let cmd = ZmtpCommand::parse(&frame.payload)?;

        if cmd.is(command::ERROR) {
            return Err(ZmtpError::Handshake(format!(
                "peer rejected handshake: {}",
                cmd.error_reason()
            )));
        }
        if self.state != NullState::RecvReady {
            return Err(ZmtpError::Protocol("handshake command out of order"));
        }
        if !cmd.is(command::READY) {
            return Err(ZmtpError::Handshake(format!(
                "expected READY, got {:?}",
                String::from_utf8_lossy(&cmd.name)
            )));
        }

        self.on_ready(&cmd)?;
        self.state = NullState::Done;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.state == NullState::Done
    }

    fn peer_identity(&self) -> Option<Bytes> {
        self.peer_identity.clone()
    }

    fn peer_socket_type(&self) -> Option<SocketType> {
        self.peer_socket_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZmtpDecoder;

    fn ready_frame(socket_type: &str, identity: Option<&[u8]>) -> ZmtpFrame {
        ZmtpFrame::command(command::build_ready(socket_type, identity))
    }

    #[test]
    fn two_mechanisms_complete() {
        let mut a = NullMechanism::new(SocketType::Dealer, Some(Bytes::from_static(b"A")));
        let mut b = NullMechanism::new(SocketType::Router, None);

        let mut a_out = BytesMut::new();
        let mut b_out = BytesMut::new();
        a.write_outbound(&mut a_out);
        b.write_outbound(&mut b_out);

        let a_frame = ZmtpDecoder::new().decode(&mut a_out).unwrap().unwrap();
        let b_frame = ZmtpDecoder::new().decode(&mut b_out).unwrap().unwrap();
        b.on_inbound(&a_frame).unwrap();
        a.on_inbound(&b_frame).unwrap();

        assert!(a.is_done() && b.is_done());
        assert_eq!(b.peer_identity(), Some(Bytes::from_static(b"A")));
        assert_eq!(b.peer_socket_type(), Some(SocketType::Dealer));
        assert_eq!(a.peer_identity(), None);
        assert_eq!(a.peer_socket_type(), Some(SocketType::Router));
    }

    #[test]
    fn ready_is_sent_once() {
        let mut mech = NullMechanism::new(SocketType::Pub, None);
        let mut out = BytesMut::new();
        mech.write_outbound(&mut out);
        let len = out.len();
        mech.write_outbound(&mut out);
        assert_eq!(out.len(), len);
    }

    #[test]
    fn data_frame_rejected() {
        let mut mech = NullMechanism::new(SocketType::Sub, None);
        mech.write_outbound(&mut BytesMut::new());
        let frame = ZmtpFrame::data(Bytes::from_static(b"x"), false);
        assert!(mech.on_inbound(&frame).is_err());
    }

    #[test]
    fn unknown_socket_type_rejected() {
        let mut mech = NullMechanism::new(SocketType::Sub, None);
        mech.write_outbound(&mut BytesMut::new());
        assert!(matches!(
            mech.on_inbound(&ready_frame("XPUBLISHER", None)),
            Err(ZmtpError::Handshake(_))
        ));
    }

    #[test]
    fn peer_error_surfaces_reason() {
        let mut mech = NullMechanism::new(SocketType::Req, None);
        mech.write_outbound(&mut BytesMut::new());
        let err = mech
            .on_inbound(&ZmtpFrame::command(command::build_error("denied")))
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
