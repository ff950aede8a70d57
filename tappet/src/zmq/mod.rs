//! ZeroMQ-style sockets over ZMTP 3.0.
//!
//! # Socket Types
//!
//! | type | sends | receives |
//! |------|-------|----------|
//! | `Router` | to the peer named by the first frame | prefixed with the sender identity |
//! | `Dealer` | round-robin | fair-queued |
//! | `Pub` | to every matching subscriber, drops when a subscriber is full | - |
//! | `Sub` | - | messages matching a subscription prefix |
//! | `Req` | request, then must receive | the reply |
//! | `Rep` | the reply, to the requester | a request, then must send |
//! | `Pair` | to its single peer | from its single peer |
//! | `Push` | round-robin | - |
//! | `Pull` | - | fair-queued |
//!
//! # Transports
//!
//! - `tcp://host:port`, `tcp://*:port`, `tcp://host:*` (bind only)
//! - `inproc://name`, within one [`Context`]
//!
//! # Example
//!
//! ```rust,no_run
//! use tappet::zmq::prelude::*;
//!
//! # fn main() -> tappet::Result<()> {
//! let ctx = Context::new()?;
//! let mut publisher = ctx.socket(SocketType::Pub);
//! publisher.bind("inproc://events")?;
//!
//! let mut subscriber = ctx.socket(SocketType::Sub);
//! subscriber.connect("inproc://events")?;
//! subscriber.subscribe("weather")?;
//!
//! publisher.send(Message::new().push_str("weather.oslo").push_str("-3C"))?;
//! let update = subscriber.recv()?;
//! # Ok(())
//! # }
//! ```

pub use tappet_zmtp::{is_end_message, Actor, Context, Shim, Socket, END_SHIM_MESSAGE};

/// Convenient imports for the ZeroMQ sockets.
///
/// ```rust
/// use tappet::zmq::prelude::*;
/// ```
pub mod prelude {
    pub use super::{Actor, Context, Shim, Socket};
    pub use crate::{
        Bytes, Message, Result, SocketEvent, SocketMonitor, SocketOptions, SocketType,
        TappetError,
    };
}
