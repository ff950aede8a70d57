//! Tappet Core
//!
//! Protocol-agnostic building blocks shared by every transport:
//! - Frames and multipart messages (`message`)
//! - Flow-controlled pipes between sockets and engines (`pipe`)
//! - The single-threaded `mio` reactor and I/O threads (`poller`)
//! - Blocking waits for application threads (`signal`)
//! - Socket options, types, endpoints, subscriptions, reconnect backoff
//! - In-process endpoint registry (`inproc`)
//! - TCP socket tuning (`tcp`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod endpoint;
pub mod error;
pub mod inproc;
pub mod message;
pub mod monitor;
pub mod options;
pub mod pipe;
pub mod poller;
pub mod reconnect;
pub mod signal;
pub mod socket_type;
pub mod subscription;
pub mod tcp;

// Small prelude for downstream crates. Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Result, TappetError};
    pub use crate::message::{Frame, Message};
    pub use crate::monitor::{SocketEvent, SocketMonitor};
    pub use crate::options::SocketOptions;
    pub use crate::pipe::{PipeEnd, PipeEvents, PipeId, TryReadError, TryWriteError};
    pub use crate::poller::{EventHandler, Interest, Poller, PollerHandle, Reactor, Token};
    pub use crate::reconnect::ReconnectState;
    pub use crate::socket_type::SocketType;
}
