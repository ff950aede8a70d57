//! Engine: one TCP connection driven by a reactor.
//!
//! The engine bridges a non-blocking `mio` stream and one [`PipeEnd`]:
//!
//! ```text
//! Connecting -> Handshaking -> Ready -> Closing -> Closed
//! ```
//!
//! Inbound bytes are decoded into messages and written into the pipe. When
//! the pipe hits its HWM the decoded message is parked and read interest is
//! dropped, so TCP flow control pushes back on the peer. The socket reading
//! below the low-water mark activates the engine again.
//!
//! Outbound messages are pulled from the pipe, encoded into the send buffer
//! and written until the kernel refuses more. Write interest is only held
//! while the send buffer is non-empty; an empty pipe activates the engine on
//! its next write.
//!
//! Each pump stops after [`BATCH_LIMIT`] units of work and re-activates the
//! engine, so one busy connection cannot starve the others on its poller.
//!
//! Errors never leave a callback: they become a disconnect of this engine.
//! Connecting engines then retry with backoff, accepted engines close.

use crate::link::SocketLink;
use crate::session::{HandshakeResult, ZmtpSession};
use bytes::{Buf, BytesMut};
use hashbrown::HashSet;
use mio::net::TcpStream;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::monitor::SocketEvent;
use tappet_core::options::SocketOptions;
use tappet_core::pipe::{self, PipeEnd, PipeEvents, PipeId, TryReadError, TryWriteError};
use tappet_core::poller::{
    EventHandler, Interest, PollerHandle, Reactor, Readiness, TimerId, Token,
};
use tappet_core::reconnect::ReconnectState;
use tappet_core::socket_type::SocketType;
use tappet_core::tcp::configure_stream;
use tracing::{debug, trace, warn};

/// Messages (inbound) or writes (outbound) per callback before the engine
/// yields to the other handlers on its poller.
const BATCH_LIMIT: usize = 256;

/// Tokens of engines spawned by one listener.
pub(crate) type ChildSet = Arc<Mutex<HashSet<Token>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Connecting,
    Handshaking,
    Ready,
    /// Flushing queued messages before closing (linger).
    Closing,
    Closed,
}

enum Role {
    Accepted {
        children: Option<ChildSet>,
    },
    Connecting {
        addrs: Vec<SocketAddr>,
        next_addr: usize,
        reconnect: ReconnectState,
        /// Pipe was created by the socket at connect time and survives
        /// reconnects.
        keeps_pipe: bool,
    },
}

/// Pipe wake hook: turns pipe activity into a reactor activation.
///
/// Activations are coalesced until the engine runs.
struct EngineWaker {
    handle: PollerHandle,
    token: Token,
    pending: AtomicBool,
}

impl EngineWaker {
    fn wake(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.handle.activate(self.token);
        }
    }

    fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

impl PipeEvents for EngineWaker {
    fn read_activated(&self, _pipe: PipeId) {
        self.wake();
    }

    fn write_activated(&self, _pipe: PipeId) {
        self.wake();
    }
}

pub(crate) struct Engine {
    link: SocketLink,
    options: SocketOptions,
    endpoint: String,
    role: Role,
    state: EngineState,
    token: Token,
    waker: Option<Arc<EngineWaker>>,

    stream: Option<TcpStream>,
    interest: Option<Interest>,
    session: ZmtpSession,
    recv_buf: BytesMut,
    send_buf: BytesMut,
    read_chunk: Vec<u8>,

    pipe: Option<PipeEnd>,
    // Decoded but refused by a full pipe
    pending_in: Option<Message>,
    // Outbound pipe had nothing left during the last fill
    drained: bool,

    handshake_timer: Option<TimerId>,
    reconnect_timer: Option<TimerId>,
    linger_timer: Option<TimerId>,
}

impl Engine {
    fn new(link: SocketLink, options: SocketOptions, endpoint: String, role: Role) -> Self {
        let session = Self::new_session(&link, &options);
        Self {
            read_chunk: vec![0; options.read_buffer_size.max(64)],
            recv_buf: BytesMut::with_capacity(options.read_buffer_size),
            send_buf: BytesMut::with_capacity(options.write_buffer_size),
            link,
            options,
            endpoint,
            role,
            state: EngineState::Connecting,
            token: Token(usize::MAX),
            waker: None,
            stream: None,
            interest: None,
            session,
            pipe: None,
            pending_in: None,
            drained: false,
            handshake_timer: None,
            reconnect_timer: None,
            linger_timer: None,
        }
    }

    /// Engine for a connection accepted by a listener.
    pub(crate) fn accepted(
        stream: TcpStream,
        peer: SocketAddr,
        link: SocketLink,
        options: SocketOptions,
        children: Option<ChildSet>,
    ) -> Self {
        let endpoint = tappet_core::endpoint::Endpoint::from_addr(peer).to_string();
        let mut engine = Self::new(link, options, endpoint, Role::Accepted { children });
        engine.stream = Some(stream);
        engine.state = EngineState::Handshaking;
        engine
    }

    /// Engine that connects to `addrs` and reconnects until closed.
    ///
    /// `pipe` is the engine end of a pipe the socket already attached, or
    /// `None` to create one once the handshake completes.
    pub(crate) fn connecting(
        endpoint: String,
        addrs: Vec<SocketAddr>,
        link: SocketLink,
        options: SocketOptions,
        pipe: Option<PipeEnd>,
    ) -> Self {
        let role = Role::Connecting {
            addrs,
            next_addr: 0,
            reconnect: ReconnectState::new(&options),
            keeps_pipe: pipe.is_some(),
        };
        let mut engine = Self::new(link, options, endpoint, role);
        engine.pipe = pipe;
        engine
    }

    fn new_session(link: &SocketLink, options: &SocketOptions) -> ZmtpSession {
        if options.router_raw && link.socket_type() == SocketType::Router {
            return ZmtpSession::raw(SocketType::Router);
        }
        ZmtpSession::new(
            link.socket_type(),
            options.routing_id.clone(),
            options.max_msg_size,
        )
    }

    fn connect_endpoint(&self) -> Option<String> {
        match self.role {
            Role::Connecting { .. } => Some(self.endpoint.clone()),
            Role::Accepted { .. } => None,
        }
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    fn start_connect(&mut self, reactor: &mut Reactor) {
        self.reconnect_timer = None;
        let Role::Connecting {
            addrs, next_addr, ..
        } = &mut self.role
        else {
            return;
        };
        let addr = addrs[*next_addr % addrs.len()];
        *next_addr = next_addr.wrapping_add(1);

        match TcpStream::connect(addr) {
            Ok(stream) => {
                trace!(endpoint = %self.endpoint, %addr, "[ENGINE] connect in progress");
                self.stream = Some(stream);
                self.state = EngineState::Connecting;
                self.link
                    .emit(SocketEvent::ConnectDelayed(self.endpoint.clone()));
                if let Err(e) = self.update_interest(reactor) {
                    self.disconnect(reactor, e.into());
                }
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "[ENGINE] connect failed");
                self.schedule_reconnect(reactor);
            }
        }
    }

    /// Connect completion check, per `mio`: writable, then `take_error`,
    /// then `peer_addr`.
    fn check_connect(&mut self, reactor: &mut Reactor) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => return self.disconnect(reactor, e.into()),
        }
        match stream.peer_addr() {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => return,
            Err(e) => return self.disconnect(reactor, e.into()),
        }

        if let Err(e) = configure_stream(stream, &self.options) {
            warn!(endpoint = %self.endpoint, error = %e, "[ENGINE] socket options not applied");
        }
        debug!(endpoint = %self.endpoint, "[ENGINE] connected");
        self.link.emit(SocketEvent::Connected(self.endpoint.clone()));
        self.on_connected(reactor);
    }

    /// Stream is up: start the handshake.
    fn on_connected(&mut self, reactor: &mut Reactor) {
        self.state = EngineState::Handshaking;
        self.session = Self::new_session(&self.link, &self.options);
        self.recv_buf.clear();
        self.send_buf.clear();
        self.session.start(&mut self.send_buf);

        let timeout = self.options.handshake_timeout;
        if !timeout.is_zero() {
            self.handshake_timer = Some(reactor.add_timer(self.token, timeout));
        }
        self.drive(reactor);
    }

    fn on_handshake(&mut self, result: HandshakeResult, reactor: &mut Reactor) -> Result<()> {
        if let Some(timer) = self.handshake_timer.take() {
            reactor.cancel_timer(timer);
        }
        if let Role::Connecting { reconnect, .. } = &mut self.role {
            reconnect.reset();
        }
        debug!(
            endpoint = %self.endpoint,
            peer_type = %result.peer_socket_type,
            peer_identity = ?result.peer_identity,
            "[ENGINE] handshake complete"
        );
        self.state = EngineState::Ready;
        self.link
            .emit(SocketEvent::HandshakeSucceeded(self.endpoint.clone()));

        if self.pipe.is_none() {
            let (mut socket_end, engine_end) =
                pipe::pair(self.options.send_hwm, self.options.recv_hwm);
            if let Some(identity) = result.peer_identity {
                socket_end.set_peer_identity(identity);
            }
            if let Some(waker) = &self.waker {
                engine_end.set_events(Arc::clone(waker) as Arc<dyn PipeEvents>);
            }
            self.pipe = Some(engine_end);
            self.drained = false;
            self.link.attach(socket_end, self.connect_endpoint())?;
        }
        Ok(())
    }

    fn schedule_reconnect(&mut self, reactor: &mut Reactor) {
        let Role::Connecting { reconnect, .. } = &mut self.role else {
            return;
        };
        let delay = reconnect.next_delay();
        self.state = EngineState::Connecting;
        self.reconnect_timer = Some(reactor.add_timer(self.token, delay));
        trace!(endpoint = %self.endpoint, ?delay, "[ENGINE] reconnect scheduled");
        self.link.emit(SocketEvent::ConnectRetried {
            endpoint: self.endpoint.clone(),
            delay,
        });
    }

    /// Drop the connection after an error. Connecting engines retry,
    /// accepted ones close.
    fn disconnect(&mut self, reactor: &mut Reactor, reason: TappetError) {
        let was = self.state;
        self.drop_stream(reactor);
        if let Some(timer) = self.handshake_timer.take() {
            reactor.cancel_timer(timer);
        }

        match was {
            EngineState::Handshaking => {
                debug!(endpoint = %self.endpoint, error = %reason, "[ENGINE] handshake failed");
                self.link.emit(SocketEvent::HandshakeFailed {
                    endpoint: self.endpoint.clone(),
                    reason: reason.to_string(),
                });
            }
            EngineState::Ready | EngineState::Closing => {
                if reason.is_connection_error() {
                    warn!(endpoint = %self.endpoint, error = %reason, "[ENGINE] protocol error");
                } else {
                    debug!(endpoint = %self.endpoint, error = %reason, "[ENGINE] disconnected");
                }
                self.link
                    .emit(SocketEvent::Disconnected(self.endpoint.clone()));
            }
            EngineState::Connecting | EngineState::Closed => {
                trace!(endpoint = %self.endpoint, error = %reason, "[ENGINE] connect attempt failed");
            }
        }

        if was == EngineState::Closing || matches!(reason, TappetError::SocketClosed) {
            return self.finish(reactor);
        }
        let keeps_pipe = match self.role {
            Role::Accepted { .. } => return self.finish(reactor),
            Role::Connecting { keeps_pipe, .. } => keeps_pipe,
        };
        if !keeps_pipe {
            self.pending_in = None;
            if let Some(pipe) = self.pipe.take() {
                pipe.close();
            }
        }
        self.schedule_reconnect(reactor);
    }

    /// Socket closed the pipe, or the reactor asked us to close.
    fn begin_close(&mut self, reactor: &mut Reactor) {
        if matches!(self.state, EngineState::Closing | EngineState::Closed) {
            return;
        }
        if let Some(timer) = self.reconnect_timer.take() {
            reactor.cancel_timer(timer);
        }
        if self.state != EngineState::Ready {
            return self.finish(reactor);
        }

        match self.options.linger {
            Some(linger) if linger.is_zero() => return self.finish(reactor),
            Some(linger) => self.linger_timer = Some(reactor.add_timer(self.token, linger)),
            None => {}
        }
        trace!(endpoint = %self.endpoint, "[ENGINE] lingering");
        self.state = EngineState::Closing;
        self.pending_in = None;
        self.drained = false;
        self.drive(reactor);
    }

    fn finish(&mut self, reactor: &mut Reactor) {
        if self.state == EngineState::Closed {
            return;
        }
        for timer in [
            self.handshake_timer.take(),
            self.reconnect_timer.take(),
            self.linger_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            reactor.cancel_timer(timer);
        }
        self.drop_stream(reactor);
        self.state = EngineState::Closed;
        self.pending_in = None;
        if let Some(pipe) = self.pipe.take() {
            pipe.close();
        }
        debug!(endpoint = %self.endpoint, "[ENGINE] closed");
        self.link.emit(SocketEvent::Closed(self.endpoint.clone()));
        reactor.remove(self.token);
    }

    fn drop_stream(&mut self, reactor: &mut Reactor) {
        if let Some(mut stream) = self.stream.take() {
            if self.interest.take().is_some() {
                let _ = reactor.registry().deregister(&mut stream);
            }
        }
        self.interest = None;
    }

    // ---------------------------------------------------------------------
    // I/O pumps
    // ---------------------------------------------------------------------

    /// Run every pump that can make progress, then fix up interest.
    fn drive(&mut self, reactor: &mut Reactor) {
        let more = match self.step(reactor) {
            Ok(more) => more,
            Err(e) => return self.disconnect(reactor, e),
        };

        if self.pipe_closed_by_socket() && self.state == EngineState::Ready {
            return self.on_pipe_closed(reactor);
        }
        if self.state == EngineState::Closing && self.drained && self.send_buf.is_empty() {
            return self.finish(reactor);
        }
        if let Err(e) = self.update_interest(reactor) {
            return self.disconnect(reactor, e.into());
        }
        // Edge-triggered readiness will not fire again for bytes we left
        if more {
            if let Some(waker) = &self.waker {
                waker.wake();
            }
        }
    }

    /// The socket closed our pipe. A connecting engine that created the
    /// pipe itself was refused (duplicate identity, PAIR already taken) and
    /// tries again after the reconnect interval. Otherwise the socket is
    /// done with this connection.
    fn on_pipe_closed(&mut self, reactor: &mut Reactor) {
        let refused = self.state == EngineState::Ready
            && matches!(self.role, Role::Connecting { keeps_pipe: false, .. });
        if refused {
            debug!(endpoint = %self.endpoint, "[ENGINE] pipe refused by socket, retrying");
            return self.disconnect(reactor, TappetError::PipeRefused);
        }
        self.begin_close(reactor);
    }

    /// `Ok(true)` when a pump stopped at its batch limit with work left.
    fn step(&mut self, reactor: &mut Reactor) -> Result<bool> {
        while self.state == EngineState::Handshaking {
            if let Some(result) = self
                .session
                .handshake(&mut self.recv_buf, &mut self.send_buf)?
            {
                self.on_handshake(result, reactor)?;
                break;
            }
            self.flush()?;
            if !self.read_chunk()? {
                return Ok(false);
            }
        }

        let mut more = false;
        if self.state == EngineState::Ready {
            more |= self.pump_in()?;
        }
        if matches!(self.state, EngineState::Ready | EngineState::Closing) {
            more |= self.pump_out()?;
        }
        Ok(more)
    }

    /// One read into the receive buffer. `Ok(false)` on would-block.
    fn read_chunk(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        loop {
            match stream.read(&mut self.read_chunk) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed").into())
                }
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&self.read_chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Socket -> application direction: decode and enqueue until the pipe
    /// is full, the kernel has nothing more, or the batch is used up.
    fn pump_in(&mut self) -> Result<bool> {
        let mut delivered = 0;
        loop {
            if let Some(msg) = self.pending_in.take() {
                let Some(pipe) = self.pipe.as_ref() else {
                    return Ok(false);
                };
                match pipe.try_write(msg) {
                    Ok(()) => {
                        delivered += 1;
                        if delivered >= BATCH_LIMIT {
                            return Ok(true);
                        }
                    }
                    Err(TryWriteError::Full(msg)) => {
                        trace!(pipe = %pipe.id(), "[ENGINE] pipe full, pausing reads");
                        self.pending_in = Some(msg);
                        return Ok(false);
                    }
                    // Socket closed its end; `drive` starts closing
                    Err(TryWriteError::Closed(_)) => return Ok(false),
                }
            }

            if let Some(msg) = self
                .session
                .decode(&mut self.recv_buf, &mut self.send_buf)?
            {
                self.pending_in = Some(msg);
                continue;
            }

            if !self.read_chunk()? {
                return Ok(false);
            }
        }
    }

    /// Application -> socket direction.
    fn pump_out(&mut self) -> Result<bool> {
        for _ in 0..BATCH_LIMIT {
            self.fill_send_buf();
            if self.send_buf.is_empty() {
                return Ok(false);
            }
            if !self.write_some()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn fill_send_buf(&mut self) {
        let Some(pipe) = self.pipe.as_ref() else {
            self.drained = true;
            return;
        };
        while self.send_buf.len() < self.options.write_buffer_size {
            match pipe.try_read() {
                Ok(msg) => self.session.encode(&msg, &mut self.send_buf),
                Err(TryReadError::Empty | TryReadError::Terminated) => {
                    self.drained = true;
                    return;
                }
            }
        }
    }

    /// Write handshake bytes without touching the pipe.
    fn flush(&mut self) -> Result<()> {
        while !self.send_buf.is_empty() {
            if !self.write_some()? {
                break;
            }
        }
        Ok(())
    }

    /// One write from the send buffer. `Ok(false)` on would-block.
    fn write_some(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        loop {
            match stream.write(&self.send_buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.send_buf.advance(n);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn pipe_closed_by_socket(&self) -> bool {
        self.pipe.as_ref().is_some_and(PipeEnd::is_peer_closed)
    }

    fn desired_interest(&self) -> Option<Interest> {
        self.stream.as_ref()?;
        let (read, write) = match self.state {
            EngineState::Connecting => (false, true),
            EngineState::Handshaking => (true, !self.send_buf.is_empty()),
            EngineState::Ready => (self.pending_in.is_none(), !self.send_buf.is_empty()),
            EngineState::Closing => (false, !self.send_buf.is_empty()),
            EngineState::Closed => (false, false),
        };
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn update_interest(&mut self, reactor: &mut Reactor) -> io::Result<()> {
        let want = self.desired_interest();
        if want == self.interest {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            self.interest = None;
            return Ok(());
        };
        let registry = reactor.registry();
        match (self.interest, want) {
            (None, Some(interest)) => registry.register(stream, self.token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(stream, self.token, interest)?,
            (Some(_), None) => registry.deregister(stream)?,
            (None, None) => {}
        }
        self.interest = want;
        Ok(())
    }
}

impl EventHandler for Engine {
    fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()> {
        self.token = token;
        let waker = Arc::new(EngineWaker {
            handle: reactor.handle().clone(),
            token,
            pending: AtomicBool::new(false),
        });
        if let Some(pipe) = &self.pipe {
            pipe.set_events(Arc::clone(&waker) as Arc<dyn PipeEvents>);
        }
        self.waker = Some(waker);

        match self.role {
            Role::Accepted { .. } => {
                if let Some(stream) = &self.stream {
                    if let Err(e) = configure_stream(stream, &self.options) {
                        warn!(endpoint = %self.endpoint, error = %e, "[ENGINE] socket options not applied");
                    }
                }
                self.on_connected(reactor);
            }
            Role::Connecting { .. } => self.start_connect(reactor),
        }
        Ok(())
    }

    fn deregister(&mut self, reactor: &mut Reactor) {
        self.drop_stream(reactor);
        if let Role::Accepted {
            children: Some(children),
        } = &self.role
        {
            children.lock().remove(&self.token);
        }
    }

    fn ready(&mut self, _token: Token, readiness: Readiness, reactor: &mut Reactor) {
        trace!(endpoint = %self.endpoint, ?readiness, state = ?self.state, "[ENGINE] ready");
        match self.state {
            EngineState::Connecting => self.check_connect(reactor),
            EngineState::Handshaking | EngineState::Ready | EngineState::Closing => {
                self.drive(reactor);
            }
            EngineState::Closed => {}
        }
    }

    fn activated(&mut self, _token: Token, reactor: &mut Reactor) {
        if let Some(waker) = &self.waker {
            waker.clear();
        }
        if self.pipe_closed_by_socket()
            && !matches!(self.state, EngineState::Closing | EngineState::Closed)
        {
            return self.on_pipe_closed(reactor);
        }
        if matches!(self.state, EngineState::Ready | EngineState::Closing) {
            self.drive(reactor);
        }
    }

    fn timer(&mut self, _token: Token, timer: TimerId, reactor: &mut Reactor) {
        if self.reconnect_timer == Some(timer) {
            self.start_connect(reactor);
        } else if self.handshake_timer == Some(timer) {
            self.handshake_timer = None;
            if self.state == EngineState::Handshaking {
                let timeout = self.options.handshake_timeout;
                self.disconnect(reactor, TappetError::HandshakeTimeout(timeout));
            }
        } else if self.linger_timer == Some(timer) {
            self.linger_timer = None;
            debug!(endpoint = %self.endpoint, "[ENGINE] linger expired, discarding");
            self.finish(reactor);
        }
    }

    fn close(&mut self, _token: Token, reactor: &mut Reactor) {
        self.begin_close(reactor);
    }
}
