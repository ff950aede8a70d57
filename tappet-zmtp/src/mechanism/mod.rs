pub mod null;

use bytes::{Bytes, BytesMut};
use tappet_core::socket_type::SocketType;

use crate::codec::{ZmtpError, ZmtpFrame};

/// Security mechanism driving the post-greeting handshake.
///
/// The mechanism is responsible for:
/// - emitting outbound handshake commands (READY, ERROR, ...)
/// - validating inbound command frames during handshake
/// - providing the peer metadata at handshake completion
pub trait Mechanism: Send {
    /// Append commands to send now to `dst`.
    fn write_outbound(&mut self, dst: &mut BytesMut);

    /// Feed an inbound handshake frame.
    ///
    /// # Errors
    ///
    /// `Handshake` or `Protocol` on any violation.
    fn on_inbound(&mut self, frame: &ZmtpFrame) -> Result<(), ZmtpError>;

    /// Whether the handshake is finished (mechanism satisfied).
    fn is_done(&self) -> bool;

    /// Peer identity from READY, owned.
    fn peer_identity(&self) -> Option<Bytes>;

    /// Peer socket type from READY.
    fn peer_socket_type(&self) -> Option<SocketType>;
}

/// In handshake, any non-command data frame is a violation.
#[inline]
pub fn require_command(frame: &ZmtpFrame) -> Result<(), ZmtpError> {
    if frame.is_command() {
        Ok(())
    } else {
        Err(ZmtpError::Protocol("data frame during handshake"))
    }
}
