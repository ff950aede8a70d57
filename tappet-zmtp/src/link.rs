//! Channel from reactor handlers back to the owning socket.
//!
//! Engines and listeners run on I/O threads and never touch the socket
//! directly. They hand new pipes over through the socket's mailbox, wake
//! the application thread through its [`Signaler`], and report lifecycle
//! events to the socket's monitor if one was requested.

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tappet_core::error::{Result, TappetError};
use tappet_core::inproc::InprocAcceptor;
use tappet_core::monitor::{SocketEvent, SocketEventSender};
use tappet_core::options::SocketOptions;
use tappet_core::pipe::PipeEnd;
use tappet_core::signal::Signaler;
use tappet_core::socket_type::SocketType;
use tracing::trace;

/// Work queued for the socket by other threads.
#[derive(Debug)]
pub(crate) enum SocketCommand {
    /// A pipe became ready. `connect` names the endpoint of the connecting
    /// engine that created it, if any.
    Attach {
        pipe: PipeEnd,
        connect: Option<String>,
    },
}

struct LinkInner {
    socket_type: SocketType,
    commands: Sender<SocketCommand>,
    signaler: Arc<Signaler>,
    monitor: Mutex<Option<SocketEventSender>>,
}

/// Cloneable handle held by every engine, listener and inproc binding of
/// one socket.
#[derive(Clone)]
pub(crate) struct SocketLink {
    inner: Arc<LinkInner>,
}

impl SocketLink {
    pub(crate) fn new(socket_type: SocketType) -> (Self, Receiver<SocketCommand>) {
        let (tx, rx) = flume::unbounded();
        let link = Self {
            inner: Arc::new(LinkInner {
                socket_type,
                commands: tx,
                signaler: Arc::new(Signaler::new()),
                monitor: Mutex::new(None),
            }),
        };
        (link, rx)
    }

    pub(crate) fn socket_type(&self) -> SocketType {
        self.inner.socket_type
    }

    pub(crate) fn signaler(&self) -> &Arc<Signaler> {
        &self.inner.signaler
    }

    /// Hand a pipe to the socket.
    ///
    /// # Errors
    ///
    /// `SocketClosed` if the socket was dropped; the pipe is closed.
    pub(crate) fn attach(&self, pipe: PipeEnd, connect: Option<String>) -> Result<()> {
        trace!(pipe = %pipe.id(), "[LINK] attaching pipe");
        self.inner
            .commands
            .send(SocketCommand::Attach { pipe, connect })
            .map_err(|_| TappetError::SocketClosed)?;
        self.inner.signaler.notify();
        Ok(())
    }

    pub(crate) fn set_monitor(&self, sender: SocketEventSender) {
        *self.inner.monitor.lock() = Some(sender);
    }

    pub(crate) fn emit(&self, event: SocketEvent) {
        let monitor = self.inner.monitor.lock();
        if let Some(sender) = monitor.as_ref() {
            let _ = sender.send(event);
        }
    }
}

/// Inproc acceptor registered by `Socket::bind("inproc://..")`.
pub(crate) struct InprocBinding {
    pub(crate) link: SocketLink,
    pub(crate) options: SocketOptions,
    pub(crate) endpoint: String,
}

impl InprocAcceptor for InprocBinding {
    fn socket_type(&self) -> SocketType {
        self.link.socket_type()
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn accept(&self, pipe: PipeEnd) -> Result<()> {
        self.link.attach(pipe, None)?;
        self.link.emit(SocketEvent::Accepted(self.endpoint.clone()));
        Ok(())
    }
}
