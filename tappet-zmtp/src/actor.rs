//! Background actor: a closure on its own thread, talking to its creator
//! over a PAIR pipe.
//!
//! The creator keeps an [`Actor`], the thread gets the [`Shim`]. Both ends
//! are ordinary PAIR sockets joined by an in-process pipe, so the two sides
//! share nothing but messages.
//!
//! Startup is synchronous: [`Actor::spawn`] returns once the shim called
//! [`Shim::signal_ok`]. Dropping the actor sends [`END_SHIM_MESSAGE`] and
//! joins the thread, so the shim must return once it sees that message.

use crate::context::Context;
use crate::socket::Socket;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe;
use tappet_core::socket_type::SocketType;
use tracing::{debug, warn};

/// Frame the actor sends to its shim when dropped.
pub const END_SHIM_MESSAGE: &str = "endPipe";

const SIGNAL_MAGIC: u64 = 0x7766_5544_3322_1100;
const STARTUP_POLL: Duration = Duration::from_millis(100);
const END_TIMEOUT: Duration = Duration::from_secs(1);

/// True if `msg` is the end request sent by a dropped [`Actor`].
#[must_use]
pub fn is_end_message(msg: &Message) -> bool {
    msg.first()
        .is_some_and(|frame| frame.as_ref() == END_SHIM_MESSAGE.as_bytes())
}

fn signal_message(status: u8) -> Message {
    let mut frame = BytesMut::with_capacity(8);
    frame.put_u64(SIGNAL_MAGIC | u64::from(status));
    Message::from(frame.freeze())
}

/// Status carried by a signal message.
fn parse_signal(msg: &Message) -> Option<u8> {
    if msg.len() != 1 {
        return None;
    }
    let frame: &Bytes = msg.first()?;
    if frame.len() != 8 {
        return None;
    }
    let value = frame.clone().get_u64();
    (value & !0xFF == SIGNAL_MAGIC).then_some((value & 0xFF) as u8)
}

/// Thread side of an actor.
pub struct Shim {
    socket: Socket,
}

impl Shim {
    /// Tell the creator that startup succeeded.
    ///
    /// # Errors
    ///
    /// Send errors of the underlying socket.
    pub fn signal_ok(&mut self) -> Result<()> {
        self.signal(0)
    }

    /// Tell the creator that startup finished with `status` (0 = ok).
    ///
    /// # Errors
    ///
    /// Send errors of the underlying socket.
    pub fn signal(&mut self, status: u8) -> Result<()> {
        self.socket.send(signal_message(status))
    }

    /// # Errors
    ///
    /// Send errors of the underlying socket.
    pub fn send(&mut self, msg: impl Into<Message>) -> Result<()> {
        self.socket.send(msg)
    }

    /// # Errors
    ///
    /// Receive errors of the underlying socket.
    pub fn recv(&mut self) -> Result<Message> {
        self.socket.recv()
    }

    /// # Errors
    ///
    /// `WouldBlock` on timeout.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.socket.recv_timeout(timeout)
    }

    pub fn socket(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

/// Creator side of an actor.
pub struct Actor {
    socket: Socket,
    thread: Option<JoinHandle<()>>,
}

impl Actor {
    /// Run `body` on a new thread and wait until it signals.
    ///
    /// # Errors
    ///
    /// `Io` if the thread cannot be spawned, `SocketClosed` if the shim
    /// returned without signalling, `FiniteStateMachine` if it signalled a
    /// non-zero status.
    pub fn spawn<F>(ctx: &Context, body: F) -> Result<Self>
    where
        F: FnOnce(Shim) + Send + 'static,
    {
        let mut socket = ctx.socket(SocketType::Pair);
        let mut shim_socket = ctx.socket(SocketType::Pair);
        let hwm = socket.options().send_hwm;
        let (ours, theirs) = pipe::pair(hwm, hwm);
        socket.adopt_pipe(ours);
        shim_socket.adopt_pipe(theirs);

        let thread = thread::Builder::new()
            .name("tappet-actor".into())
            .spawn(move || body(Shim {
                socket: shim_socket,
            }))?;
        let mut actor = Self {
            socket,
            thread: Some(thread),
        };
        actor.await_signal()?;
        debug!("[ACTOR] started");
        Ok(actor)
    }

    fn await_signal(&mut self) -> Result<()> {
        loop {
            match self.socket.recv_timeout(STARTUP_POLL) {
                Ok(msg) => match parse_signal(&msg) {
                    Some(0) => return Ok(()),
                    Some(_) => {
                        return Err(TappetError::FiniteStateMachine(
                            "actor reported a startup failure",
                        ))
                    }
                    None => warn!("[ACTOR] discarding message sent before the start signal"),
                },
                Err(TappetError::WouldBlock) => {
                    if self.thread.as_ref().map_or(true, JoinHandle::is_finished) {
                        return Err(TappetError::SocketClosed);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// # Errors
    ///
    /// Send errors of the underlying socket.
    pub fn send(&mut self, msg: impl Into<Message>) -> Result<()> {
        self.socket.send(msg)
    }

    /// # Errors
    ///
    /// Receive errors of the underlying socket.
    pub fn recv(&mut self) -> Result<Message> {
        self.socket.recv()
    }

    /// # Errors
    ///
    /// `WouldBlock` on timeout.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.socket.recv_timeout(timeout)
    }

    pub fn socket(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        let running = self.thread.as_ref().is_some_and(|t| !t.is_finished());
        if running {
            if let Err(e) = self.socket.send_timeout(END_SHIM_MESSAGE, END_TIMEOUT) {
                debug!(error = %e, "[ACTOR] could not deliver end message");
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[ACTOR] shim thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_encoding() {
        assert_eq!(parse_signal(&signal_message(0)), Some(0));
        assert_eq!(parse_signal(&signal_message(7)), Some(7));
        assert_eq!(parse_signal(&Message::from("not a signal")), None);
        assert_eq!(parse_signal(&Message::from(vec![0u8; 8])), None);
    }

    #[test]
    fn hello_world() {
        let ctx = Context::new().unwrap();
        let mut actor = Actor::spawn(&ctx, |mut shim| {
            shim.signal_ok().unwrap();
            while let Ok(msg) = shim.recv() {
                if is_end_message(&msg) {
                    break;
                }
                if msg.first().is_some_and(|f| f.as_ref() == b"Hello") {
                    shim.send("World").unwrap();
                }
            }
        })
        .unwrap();

        actor
            .send(Message::new().push_str("Hello").push_str("Hello"))
            .unwrap();
        assert_eq!(
            actor.recv_timeout(Duration::from_secs(5)).unwrap(),
            Message::from("World")
        );
    }

    #[test]
    fn shim_exiting_without_signal_fails_spawn() {
        let ctx = Context::new().unwrap();
        let result = Actor::spawn(&ctx, |_shim| {});
        assert!(matches!(result, Err(TappetError::SocketClosed)));
    }

    #[test]
    fn failure_status_is_reported() {
        let ctx = Context::new().unwrap();
        let result = Actor::spawn(&ctx, |mut shim| {
            let _ = shim.signal(3);
            let _ = shim.recv();
        });
        assert!(matches!(result, Err(TappetError::FiniteStateMachine(_))));
    }
}
