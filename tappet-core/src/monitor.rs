//! Socket event monitoring.
//!
//! Engines and listeners report lifecycle transitions on a `flume` channel.
//! The channel only exists once the application asked for a monitor.

use std::fmt;
use std::time::Duration;

/// Socket lifecycle events. Endpoints are rendered as `tcp://addr:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Listener is accepting on this endpoint.
    Listening(String),

    /// Listener accepted a connection from this peer.
    Accepted(String),

    /// Outgoing TCP connection established.
    Connected(String),

    /// Connection attempt is in progress (non-blocking connect).
    ConnectDelayed(String),

    /// Connection attempt failed or dropped; retrying after `delay`.
    ConnectRetried { endpoint: String, delay: Duration },

    /// ZMTP greeting and READY exchange completed.
    HandshakeSucceeded(String),

    /// Greeting, READY or peer type rejected.
    HandshakeFailed { endpoint: String, reason: String },

    /// Established connection lost.
    Disconnected(String),

    /// Listener or connection closed on request.
    Closed(String),
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening(ep) => write!(f, "Listening on {ep}"),
            Self::Accepted(ep) => write!(f, "Accepted connection from {ep}"),
            Self::Connected(ep) => write!(f, "Connected to {ep}"),
            Self::ConnectDelayed(ep) => write!(f, "Connecting to {ep}"),
            Self::ConnectRetried { endpoint, delay } => {
                write!(f, "Reconnecting to {endpoint} in {delay:?}")
            }
            Self::HandshakeSucceeded(ep) => write!(f, "Handshake completed with {ep}"),
            Self::HandshakeFailed { endpoint, reason } => {
                write!(f, "Handshake failed with {endpoint}: {reason}")
            }
            Self::Disconnected(ep) => write!(f, "Disconnected from {ep}"),
            Self::Closed(ep) => write!(f, "Closed {ep}"),
        }
    }
}

/// Receiving side handed to the application.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sending side held by engines and listeners.
pub type SocketEventSender = flume::Sender<SocketEvent>;

#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}
