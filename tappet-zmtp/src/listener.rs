//! TCP listener handler.
//!
//! The socket binds the listening socket on its own thread, so address
//! errors and the chosen port are reported synchronously. The bound
//! listener is then handed to a reactor, which accepts connections and
//! spawns one [`Engine`] per peer. Closing the listener closes every
//! connection it accepted.

use crate::engine::{ChildSet, Engine};
use crate::link::SocketLink;
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tappet_core::endpoint::Endpoint;
use tappet_core::monitor::SocketEvent;
use tappet_core::options::SocketOptions;
use tappet_core::poller::{EventHandler, Interest, Reactor, Readiness, Token};
use tappet_core::tcp;
use tracing::{debug, trace, warn};

pub(crate) struct Listener {
    listener: TcpListener,
    endpoint: String,
    link: SocketLink,
    options: SocketOptions,
    children: ChildSet,
    registered: bool,
}

impl Listener {
    /// Bind `addr` (port 0 picks a free port).
    ///
    /// # Errors
    ///
    /// The OS bind error, e.g. `AddrInUse`.
    pub(crate) fn bind(
        addr: SocketAddr,
        link: SocketLink,
        options: SocketOptions,
    ) -> io::Result<Self> {
        let listener = tcp::bind_listener(addr, options.ipv4_only)?;
        let local = listener.local_addr()?;
        Ok(Self {
            listener,
            endpoint: Endpoint::from_addr(local).to_string(),
            link,
            options,
            children: ChildSet::default(),
            registered: false,
        })
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Resolved endpoint, `tcp://ip:port`.
    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn accept_all(&mut self, reactor: &mut Reactor) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let engine = Engine::accepted(
                        stream,
                        peer,
                        self.link.clone(),
                        self.options.clone(),
                        Some(Arc::clone(&self.children)),
                    );
                    let token = reactor.spawn(Box::new(engine));
                    self.children.lock().insert(token);
                    trace!(endpoint = %self.endpoint, %peer, ?token, "[LISTENER] accepted");
                    self.link
                        .emit(SocketEvent::Accepted(Endpoint::from_addr(peer).to_string()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // EMFILE and friends: keep listening
                    warn!(endpoint = %self.endpoint, error = %e, "[LISTENER] accept failed");
                    return;
                }
            }
        }
    }
}

impl EventHandler for Listener {
    fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()> {
        reactor
            .registry()
            .register(&mut self.listener, token, Interest::READABLE)?;
        self.registered = true;
        debug!(endpoint = %self.endpoint, "[LISTENER] listening");
        self.link
            .emit(SocketEvent::Listening(self.endpoint.clone()));
        // Connections queued between bind and registration
        self.accept_all(reactor);
        Ok(())
    }

    fn deregister(&mut self, reactor: &mut Reactor) {
        if self.registered {
            let _ = reactor.registry().deregister(&mut self.listener);
            self.registered = false;
        }
    }

    fn ready(&mut self, _token: Token, _readiness: Readiness, reactor: &mut Reactor) {
        self.accept_all(reactor);
    }

    fn close(&mut self, token: Token, reactor: &mut Reactor) {
        let children: Vec<Token> = self.children.lock().drain().collect();
        debug!(
            endpoint = %self.endpoint,
            connections = children.len(),
            "[LISTENER] closing"
        );
        for child in children {
            reactor.close(child);
        }
        self.link.emit(SocketEvent::Closed(self.endpoint.clone()));
        reactor.remove(token);
    }
}
