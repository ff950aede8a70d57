//! Application-facing socket.
//!
//! A [`Socket`] is owned by one application thread. It never performs I/O
//! itself: TCP listeners and connections run as handlers on the context's
//! I/O threads and exchange messages with the socket through pipes. Pipes
//! created on other threads reach the socket through its [`SocketLink`]
//! mailbox and are attached the next time the socket is used.
//!
//! Blocking calls poll the pattern, then park on the socket's [`Signaler`]
//! until a pipe reports activity or the timeout expires. A zero timeout makes
//! the call non-blocking; an expired timeout is reported as
//! [`TappetError::WouldBlock`].
//!
//! [`Signaler`]: tappet_core::signal::Signaler

use crate::base::SendError;
use crate::context::Context;
use crate::engine::Engine;
use crate::link::{InprocBinding, SocketCommand, SocketLink};
use crate::listener::Listener;
use crate::pattern::Pattern;
use bytes::Bytes;
use flume::Receiver;
use hashbrown::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tappet_core::endpoint::Endpoint;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::monitor::{create_monitor, SocketEvent, SocketMonitor};
use tappet_core::options::SocketOptions;
use tappet_core::pipe::{self, PipeEnd, PipeEvents, PipeId};
use tappet_core::poller::{PollerHandle, Token};
use tappet_core::socket_type::SocketType;
use tracing::{debug, trace};

enum Bound {
    Tcp {
        handle: PollerHandle,
        token: Token,
        addr: SocketAddr,
    },
    Inproc(String),
}

#[derive(Default)]
struct Connection {
    /// Connecting engine, TCP only.
    engine: Option<(PollerHandle, Token)>,
    pipes: Vec<PipeId>,
}

/// A messaging socket of one [`SocketType`].
pub struct Socket {
    ctx: Context,
    id: u64,
    socket_type: SocketType,
    options: SocketOptions,
    link: SocketLink,
    commands: Receiver<SocketCommand>,
    pattern: Pattern,
    binds: HashMap<String, Bound>,
    connects: HashMap<String, Connection>,
    last_endpoint: Option<String>,
    closed: bool,
}

impl Socket {
    pub(crate) fn new(ctx: Context, id: u64, socket_type: SocketType) -> Self {
        let options = SocketOptions::default();
        let (link, commands) = SocketLink::new(socket_type);
        Self {
            pattern: Pattern::new(socket_type, &options),
            ctx,
            id,
            socket_type,
            options,
            link,
            commands,
            binds: HashMap::new(),
            connects: HashMap::new(),
            last_endpoint: None,
            closed: false,
        }
    }

    #[must_use]
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Replace the socket options.
    ///
    /// Pipe and connection settings (HWM, identity, timeouts of the
    /// handshake and reconnect) apply to connections made afterwards.
    ///
    /// # Errors
    ///
    /// `Io` with `InvalidInput` for a malformed routing id.
    pub fn set_options(&mut self, options: SocketOptions) -> Result<()> {
        if let Some(id) = &options.routing_id {
            SocketOptions::validate_routing_id(id)?;
        }
        self.pattern.apply_options(&options);
        self.options = options;
        Ok(())
    }

    /// Last endpoint bound or connected, resolved for TCP binds.
    #[must_use]
    pub fn last_endpoint(&self) -> Option<&str> {
        self.last_endpoint.as_deref()
    }

    /// Start receiving lifecycle events for this socket.
    ///
    /// Only events raised after the call are delivered. A second call
    /// replaces the previous monitor.
    pub fn monitor(&mut self) -> SocketMonitor {
        let (tx, rx) = create_monitor();
        self.link.set_monitor(tx);
        rx
    }

    /// Accept connections on `endpoint`.
    ///
    /// `tcp://host:*` binds an ephemeral port. Returns the resolved
    /// endpoint, e.g. `tcp://127.0.0.1:41234`.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint`, `NotSupported` for unknown transports, `AddrInUse`
    /// when the address or inproc name is taken.
    pub fn bind(&mut self, endpoint: &str) -> Result<String> {
        self.check_open()?;
        let resolved = match Endpoint::parse(endpoint)? {
            Endpoint::Inproc(name) => {
                let binding = InprocBinding {
                    link: self.link.clone(),
                    options: self.options.clone(),
                    endpoint: endpoint.to_string(),
                };
                self.ctx.registry().bind(&name, self.id, Arc::new(binding))?;
                self.binds
                    .insert(endpoint.to_string(), Bound::Inproc(name));
                self.link
                    .emit(SocketEvent::Listening(endpoint.to_string()));
                endpoint.to_string()
            }
            tcp @ Endpoint::Tcp { .. } => {
                let mut failure = None;
                let mut bound = None;
                // `tcp://*` without ipv4_only falls back to IPv4 on hosts
                // without IPv6
                for addr in tcp.resolve_with(self.options.ipv4_only)? {
                    match Listener::bind(addr, self.link.clone(), self.options.clone()) {
                        Ok(listener) => {
                            bound = Some(listener);
                            break;
                        }
                        Err(e) => {
                            trace!(%addr, error = %e, "[SOCKET] bind attempt failed");
                            failure.get_or_insert(e);
                        }
                    }
                }
                let listener = match (bound, failure) {
                    (Some(listener), _) => listener,
                    (None, Some(e)) => return Err(bind_error(e, endpoint)),
                    (None, None) => return Err(TappetError::invalid_endpoint(endpoint)),
                };
                let addr = listener.local_addr()?;
                let resolved = listener.endpoint().to_string();

                let handle = self.ctx.next_io_thread();
                let token = handle.spawn(Box::new(listener))?;
                self.binds.insert(
                    resolved.clone(),
                    Bound::Tcp {
                        handle,
                        token,
                        addr,
                    },
                );
                resolved
            }
        };

        debug!(socket_type = %self.socket_type, endpoint = %resolved, "[SOCKET] bound");
        self.last_endpoint = Some(resolved.clone());
        Ok(resolved)
    }

    /// Bind an ephemeral TCP port on `host` and return the port.
    ///
    /// # Errors
    ///
    /// As [`bind`](Self::bind).
    pub fn bind_random_port(&mut self, host: &str) -> Result<u16> {
        let host = host.strip_prefix("tcp://").unwrap_or(host);
        let resolved = self.bind(&format!("tcp://{host}:*"))?;
        match self.binds.get(&resolved) {
            Some(Bound::Tcp { addr, .. }) => Ok(addr.port()),
            _ => Err(TappetError::invalid_endpoint(resolved)),
        }
    }

    /// Stop accepting on `endpoint` and close the connections it accepted.
    ///
    /// # Errors
    ///
    /// `EndpointNotFound` if the socket is not bound there.
    pub fn unbind(&mut self, endpoint: &str) -> Result<()> {
        let key = self
            .find_bind(endpoint)
            .ok_or_else(|| TappetError::EndpointNotFound(endpoint.to_string()))?;
        match self.binds.remove(&key) {
            Some(Bound::Tcp { handle, token, .. }) => handle.close(token),
            Some(Bound::Inproc(name)) => {
                self.ctx.registry().unbind(&name, self.id)?;
                self.link.emit(SocketEvent::Closed(key.clone()));
            }
            None => {}
        }
        debug!(endpoint = %key, "[SOCKET] unbound");
        Ok(())
    }

    fn find_bind(&self, endpoint: &str) -> Option<String> {
        if self.binds.contains_key(endpoint) {
            return Some(endpoint.to_string());
        }
        let addrs = Endpoint::parse(endpoint)
            .ok()?
            .resolve_with(self.options.ipv4_only)
            .ok()?;
        self.binds.iter().find_map(|(key, bound)| match bound {
            Bound::Tcp { addr, .. } if addrs.contains(addr) => Some(key.clone()),
            _ => None,
        })
    }

    /// Connect to `endpoint`.
    ///
    /// TCP connections are made in the background and retried until the
    /// endpoint is disconnected. Unless `immediate` is set (or the socket
    /// is a ROUTER), a pipe exists right away and messages queue up to the
    /// send HWM while the connection is pending.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` for a wildcard host or port, `EndpointNotFound`
    /// for an unbound inproc name, `IncompatibleSocket` for inproc peers
    /// of the wrong type.
    pub fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.check_open()?;
        if self.connects.contains_key(endpoint) {
            debug!(endpoint, "[SOCKET] already connected");
            return Ok(());
        }

        match Endpoint::parse(endpoint)? {
            Endpoint::Inproc(name) => {
                let pipe = self
                    .ctx
                    .registry()
                    .connect(&name, self.socket_type, &self.options)?;
                self.connects
                    .insert(endpoint.to_string(), Connection::default());
                self.attach_pipe(pipe, Some(endpoint));
                self.link
                    .emit(SocketEvent::Connected(endpoint.to_string()));
            }
            tcp @ Endpoint::Tcp { .. } => {
                if matches!(&tcp, Endpoint::Tcp { host, port } if host == "*" || port.is_none()) {
                    return Err(TappetError::invalid_endpoint(format!(
                        "cannot connect to wildcard address {endpoint}"
                    )));
                }
                let addrs = tcp.resolve_with(self.options.ipv4_only)?;

                let mut socket_end = None;
                let mut engine_end = None;
                if !self.options.immediate && self.socket_type != SocketType::Router {
                    let (ours, theirs) =
                        pipe::pair(self.options.send_hwm, self.options.recv_hwm);
                    socket_end = Some(ours);
                    engine_end = Some(theirs);
                }

                let engine = Engine::connecting(
                    endpoint.to_string(),
                    addrs,
                    self.link.clone(),
                    self.options.clone(),
                    engine_end,
                );
                let handle = self.ctx.next_io_thread();
                let token = handle.spawn(Box::new(engine))?;
                self.connects.insert(
                    endpoint.to_string(),
                    Connection {
                        engine: Some((handle, token)),
                        pipes: Vec::new(),
                    },
                );
                if let Some(pipe) = socket_end {
                    self.attach_pipe(pipe, Some(endpoint));
                }
            }
        }

        debug!(socket_type = %self.socket_type, endpoint, "[SOCKET] connected");
        self.last_endpoint = Some(endpoint.to_string());
        Ok(())
    }

    /// Drop the connection to `endpoint`. Queued outbound messages are
    /// flushed for up to the linger period.
    ///
    /// # Errors
    ///
    /// `EndpointNotFound` if the socket never connected there.
    pub fn disconnect(&mut self, endpoint: &str) -> Result<()> {
        self.process_commands();
        let conn = self
            .connects
            .remove(endpoint)
            .ok_or_else(|| TappetError::EndpointNotFound(endpoint.to_string()))?;
        if let Some((handle, token)) = conn.engine {
            handle.close(token);
        }
        for id in conn.pipes {
            if let Some(pipe) = self.pattern.detach(id) {
                pipe.close();
            }
        }
        debug!(endpoint, "[SOCKET] disconnected");
        Ok(())
    }

    /// Send with the configured send timeout.
    ///
    /// # Errors
    ///
    /// `WouldBlock` on timeout (the message is dropped), pattern errors
    /// such as `FiniteStateMachine` or `HostUnreachable`.
    pub fn send(&mut self, msg: impl Into<Message>) -> Result<()> {
        let timeout = self.options.send_timeout;
        self.send_inner(msg.into(), timeout)
    }

    /// Send without blocking.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn try_send(&mut self, msg: impl Into<Message>) -> Result<()> {
        self.send_inner(msg.into(), Some(Duration::ZERO))
    }

    /// Send, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub fn send_timeout(&mut self, msg: impl Into<Message>, timeout: Duration) -> Result<()> {
        self.send_inner(msg.into(), Some(timeout))
    }

    fn send_inner(&mut self, msg: Message, timeout: Option<Duration>) -> Result<()> {
        self.check_open()?;
        let mut pending = Some(msg);
        self.wait_for(timeout, |socket| {
            let Some(msg) = pending.take() else {
                return Ok(Some(()));
            };
            match socket.pattern.send(msg) {
                Ok(()) => Ok(Some(())),
                Err(SendError::Again(back)) => {
                    pending = Some(back);
                    Ok(None)
                }
                Err(SendError::Failed(e)) => Err(e),
            }
        })
    }

    /// Receive with the configured receive timeout.
    ///
    /// # Errors
    ///
    /// `WouldBlock` on timeout, pattern errors such as
    /// `FiniteStateMachine` or `NotSupported`.
    pub fn recv(&mut self) -> Result<Message> {
        let timeout = self.options.recv_timeout;
        self.recv_inner(timeout)
    }

    /// Receive without blocking.
    ///
    /// # Errors
    ///
    /// As [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Message> {
        self.recv_inner(Some(Duration::ZERO))
    }

    /// Receive, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`recv`](Self::recv).
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.recv_inner(Some(timeout))
    }

    fn recv_inner(&mut self, timeout: Option<Duration>) -> Result<Message> {
        self.check_open()?;
        self.wait_for(timeout, |socket| socket.pattern.recv())
    }

    /// True when a receive would not block.
    pub fn has_in(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.refresh();
        self.pattern.has_in()
    }

    /// True when a send would not block.
    pub fn has_out(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.refresh();
        self.pattern.has_out()
    }

    /// Subscribe a SUB socket to messages starting with `prefix`.
    /// An empty prefix matches everything.
    ///
    /// # Errors
    ///
    /// `NotSupported` on other socket types.
    pub fn subscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.check_open()?;
        self.refresh();
        self.pattern.subscribe(prefix.into())
    }

    /// # Errors
    ///
    /// `NotSupported` on other socket types.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.check_open()?;
        self.refresh();
        self.pattern.unsubscribe(prefix)
    }

    /// Close every pipe, listener and connection. Also done on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.process_commands();

        // Engines hear about the close before they see their pipes go away
        for (_, bound) in self.binds.drain() {
            if let Bound::Tcp { handle, token, .. } = bound {
                handle.close(token);
            }
        }
        for (_, conn) in self.connects.drain() {
            if let Some((handle, token)) = conn.engine {
                handle.close(token);
            }
        }
        self.pattern.close_all();
        self.ctx.registry().unbind_all(self.id);
        debug!(socket_type = %self.socket_type, "[SOCKET] closed");
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(TappetError::SocketClosed);
        }
        Ok(())
    }

    /// Attach pending pipes and forget dead ones.
    fn refresh(&mut self) {
        self.process_commands();
        self.pattern.reap();
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SocketCommand::Attach { pipe, connect } => {
                    if self.closed {
                        pipe.close();
                        continue;
                    }
                    self.attach_pipe(pipe, connect.as_deref());
                }
            }
        }
    }

    /// Attach a pipe whose other end belongs to a socket in this process.
    pub(crate) fn adopt_pipe(&mut self, pipe: PipeEnd) {
        self.attach_pipe(pipe, None);
    }

    fn attach_pipe(&mut self, pipe: PipeEnd, connect: Option<&str>) {
        if let Some(endpoint) = connect {
            let Some(conn) = self.connects.get_mut(endpoint) else {
                trace!(pipe = %pipe.id(), endpoint, "[SOCKET] endpoint disconnected, dropping pipe");
                pipe.close();
                return;
            };
            let live = self.pattern.pipes();
            conn.pipes.retain(|id| live.contains_key(id));
            conn.pipes.push(pipe.id());
        }

        let events: Arc<dyn PipeEvents> = Arc::clone(self.link.signaler()) as Arc<dyn PipeEvents>;
        pipe.set_events(events);
        trace!(pipe = %pipe.id(), socket_type = %self.socket_type, "[SOCKET] pipe attached");
        // A PAIR must forget its dead peer before taking a new one
        self.pattern.reap();
        self.pattern.attach(pipe);
    }

    /// Run `op` until it yields a value, fails, or `timeout` expires.
    fn wait_for<T>(
        &mut self,
        timeout: Option<Duration>,
        mut op: impl FnMut(&mut Self) -> Result<Option<T>>,
    ) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen = self.link.signaler().generation();
            self.refresh();
            if let Some(value) = op(self)? {
                return Ok(value);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TappetError::WouldBlock);
            }
            self.link.signaler().wait(seen, deadline);
        }
    }
}

fn bind_error(e: io::Error, endpoint: &str) -> TappetError {
    if e.kind() == io::ErrorKind::AddrInUse {
        TappetError::AddrInUse(endpoint.to_string())
    } else {
        TappetError::Io(e)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("socket_type", &self.socket_type)
            .field("pipes", &self.pattern.pipes().len())
            .field("binds", &self.binds.keys().collect::<Vec<_>>())
            .field("connects", &self.connects.keys().collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish()
    }
}
