//! # Tappet ZMTP
//!
//! ZMTP 3.0 transport and socket patterns for Tappet.
//!
//! ## Overview
//!
//! - **Codec**: sans-IO frame encoder/decoder, greeting, commands and the
//!   NULL security mechanism (`codec`, `greeting`, `command`, `mechanism`,
//!   `session`)
//! - **Engine**: one reactor handler per TCP connection, bridging the byte
//!   stream to a pipe with backpressure, reconnect and linger
//! - **Patterns**: ROUTER, DEALER, PUB, SUB, REQ, REP, PAIR, PUSH, PULL
//! - **Socket API**: [`Context`], [`Socket`] and the [`Actor`] wrapper
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tappet_zmtp::{Context, SocketType};
//!
//! # fn main() -> tappet_core::error::Result<()> {
//! let ctx = Context::new()?;
//! let mut rep = ctx.socket(SocketType::Rep);
//! let endpoint = rep.bind("tcp://127.0.0.1:*")?;
//!
//! let mut req = ctx.socket(SocketType::Req);
//! req.connect(&endpoint)?;
//! req.send("ping")?;
//!
//! let request = rep.recv()?;
//! rep.send(request)?;
//! let reply = req.recv()?;
//! assert_eq!(reply.first().map(|f| &f[..]), Some(&b"ping"[..]));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::match_same_arms)]

// Protocol
pub mod codec;
pub mod command;
pub mod greeting;
pub mod mechanism;
pub mod session;

// Reactor handlers
mod engine;
mod link;
mod listener;

// Patterns
mod base;
mod dealer;
mod pair;
mod pattern;
mod publisher;
mod pull;
mod push;
mod rep;
mod req;
mod router;
mod subscriber;

// Application API
pub mod actor;
pub mod context;
pub mod socket;

pub use actor::{is_end_message, Actor, Shim, END_SHIM_MESSAGE};
pub use context::Context;
pub use socket::Socket;
pub use tappet_core::socket_type::SocketType;

/// Prelude module for convenient imports
///
/// ```rust
/// use tappet_zmtp::prelude::*;
/// ```
pub mod prelude {
    pub use super::{Actor, Context, Shim, Socket, SocketType};
    pub use bytes::Bytes;
    pub use tappet_core::error::{Result, TappetError};
    pub use tappet_core::message::Message;
    pub use tappet_core::monitor::{SocketEvent, SocketMonitor};
    pub use tappet_core::options::SocketOptions;
}
