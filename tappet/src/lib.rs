//! # Tappet
//!
//! ZeroMQ-style messaging: sockets exchanging multipart messages over TCP
//! (ZMTP 3.0) or in-process pipes, with built-in framing, backpressure and
//! connection lifecycle management.
//!
//! ## Architecture
//!
//! - **`tappet-core`**: messages, flow-controlled pipes, the `mio` reactor,
//!   options, endpoints and the in-process registry
//! - **`tappet-zmtp`**: ZMTP codec and handshake, per-connection engines,
//!   socket patterns and the blocking socket API
//! - **`tappet`**: public API surface (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`zmq`** (default) - ZMTP 3.0 sockets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "zmq")]
//! # fn main() -> tappet::Result<()> {
//! use tappet::zmq::prelude::*;
//!
//! let ctx = Context::new()?;
//!
//! let mut router = ctx.socket(SocketType::Router);
//! let endpoint = router.bind("tcp://127.0.0.1:*")?;
//!
//! let mut dealer = ctx.socket(SocketType::Dealer);
//! dealer.set_options(SocketOptions::new().with_routing_id("A"))?;
//! dealer.connect(&endpoint)?;
//! dealer.send("ping")?;
//!
//! // [identity, "ping"]
//! let msg = router.recv()?;
//! assert_eq!(msg.first().map(|f| &f[..]), Some(&b"A"[..]));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "zmq"))]
//! # fn main() {}
//! ```
//!
//! ## Threading
//!
//! Each [`zmq::Context`] runs one or more I/O threads, each a single-threaded
//! reactor. A socket belongs to one application thread; blocking calls park
//! that thread until a pipe signals activity or the timeout expires.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use bytes::Bytes;
pub use tappet_core::error::{Result, TappetError};
pub use tappet_core::message::{Frame, Message};
pub use tappet_core::monitor::{SocketEvent, SocketMonitor};
pub use tappet_core::options::SocketOptions;
pub use tappet_core::socket_type::SocketType;

pub mod dev_tracing;

// Protocol modules (opt-in via features)
#[cfg(feature = "zmq")]
pub mod zmq;
