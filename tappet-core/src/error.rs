/// Tappet Error Types
///
/// One taxonomy shared by the reactor, the engines and the socket API.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Tappet operations
#[derive(Error, Debug)]
pub enum TappetError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame or command on an established connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Greeting or READY exchange failed (version, mechanism, peer type)
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Handshake did not complete in time
    #[error("Handshake timeout after {0:?}")]
    HandshakeTimeout(Duration),

    /// Non-blocking operation could not complete now
    #[error("Operation would block")]
    WouldBlock,

    /// Router in mandatory mode has no pipe for the destination identity
    #[error("Host unreachable")]
    HostUnreachable,

    /// Req/Rep call sequence violated
    #[error("Operation cannot be accomplished in current state: {0}")]
    FiniteStateMachine(&'static str),

    /// No listener bound under this name / endpoint
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Endpoint already bound
    #[error("Address in use: {0}")]
    AddrInUse(String),

    /// Endpoint string could not be parsed or resolved
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Peer socket type cannot talk to ours
    #[error("Incompatible socket types: {local} cannot connect to {peer}")]
    IncompatibleSocket {
        local: &'static str,
        peer: &'static str,
    },

    /// Operation not available on this socket type or transport
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: usize },

    /// The socket would not take a new connection's pipe (duplicate
    /// identity, exclusive peer already attached)
    #[error("Pipe refused by socket")]
    PipeRefused,

    /// Socket closed
    #[error("Socket closed")]
    SocketClosed,

    /// Context has been shut down
    #[error("Context terminated")]
    ContextTerminated,
}

/// Result type alias for Tappet operations
pub type Result<T> = std::result::Result<T, TappetError>;

impl TappetError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a handshake error with a message
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create an invalid endpoint error
    pub fn invalid_endpoint(msg: impl Into<String>) -> Self {
        Self::InvalidEndpoint(msg.into())
    }

    /// Check if this error is recoverable by retrying the same call
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::WouldBlock | Self::HostUnreachable => true,
            _ => false,
        }
    }

    /// Check if this error is fatal to a single connection only
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::Handshake(_)
                | Self::HandshakeTimeout(_)
                | Self::IncompatibleSocket { .. }
                | Self::MessageTooLarge { .. }
        )
    }
}
