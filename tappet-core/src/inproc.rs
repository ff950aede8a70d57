//! In-process transport registry.
//!
//! Inproc sockets skip the byte codec: connecting creates a [`pipe::pair`]
//! and hands one end to the bound socket through its [`InprocAcceptor`].
//!
//! The registry is an explicit object owned by a context, so sockets in
//! different contexts never see each other's names. Names are added on bind,
//! removed on unbind (owner only), and all dropped when the context clears
//! the registry at teardown.

use crate::error::{Result, TappetError};
use crate::options::SocketOptions;
use crate::pipe::{self, PipeEnd};
use crate::socket_type::SocketType;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Bound side of an inproc endpoint.
pub trait InprocAcceptor: Send + Sync {
    fn socket_type(&self) -> SocketType;

    /// Options of the bound socket, as of bind time.
    fn options(&self) -> &SocketOptions;

    /// Take ownership of a freshly connected pipe end.
    ///
    /// # Errors
    ///
    /// `SocketClosed` if the bound socket is gone.
    fn accept(&self, pipe: PipeEnd) -> Result<()>;
}

struct Binding {
    owner: u64,
    acceptor: Arc<dyn InprocAcceptor>,
}

/// Name -> bound socket map.
#[derive(Default)]
pub struct InprocRegistry {
    bindings: DashMap<String, Binding>,
}

impl InprocRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for the socket identified by `owner`.
    ///
    /// # Errors
    ///
    /// `AddrInUse` if the name is already bound.
    pub fn bind(&self, name: &str, owner: u64, acceptor: Arc<dyn InprocAcceptor>) -> Result<()> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TappetError::AddrInUse(format!("inproc://{name}"))),
            Entry::Vacant(slot) => {
                slot.insert(Binding { owner, acceptor });
                debug!(name, owner, "[INPROC] bound");
                Ok(())
            }
        }
    }

    /// Remove `name` if `owner` bound it.
    ///
    /// # Errors
    ///
    /// `EndpointNotFound` if the name is unknown or owned by another socket.
    pub fn unbind(&self, name: &str, owner: u64) -> Result<()> {
        if self
            .bindings
            .remove_if(name, |_, binding| binding.owner == owner)
            .is_none()
        {
            return Err(TappetError::EndpointNotFound(format!("inproc://{name}")));
        }
        debug!(name, owner, "[INPROC] unbound");
        Ok(())
    }

    /// Remove every name bound by `owner`.
    pub fn unbind_all(&self, owner: u64) {
        self.bindings.retain(|_, binding| binding.owner != owner);
    }

    /// Connect to `name`: returns the connecting socket's pipe end after
    /// handing the other end to the bound socket.
    ///
    /// # Errors
    ///
    /// `EndpointNotFound` if nothing is bound under `name`,
    /// `IncompatibleSocket` if the two socket types cannot talk, or the
    /// acceptor's error if the bound socket is gone.
    pub fn connect(
        &self,
        name: &str,
        socket_type: SocketType,
        options: &SocketOptions,
    ) -> Result<PipeEnd> {
        let acceptor = self
            .bindings
            .get(name)
            .map(|binding| Arc::clone(&binding.acceptor))
            .ok_or_else(|| TappetError::EndpointNotFound(format!("inproc://{name}")))?;

        let peer_type = acceptor.socket_type();
        if !socket_type.is_compatible(peer_type) {
            return Err(TappetError::IncompatibleSocket {
                local: socket_type.as_str(),
                peer: peer_type.as_str(),
            });
        }

        let peer_options = acceptor.options();
        let (mut ours, mut theirs) = pipe::pair(
            SocketOptions::inproc_hwm(options, peer_options),
            SocketOptions::inproc_hwm(peer_options, options),
        );
        if let Some(id) = &peer_options.routing_id {
            ours.set_peer_identity(id.clone());
        }
        if let Some(id) = &options.routing_id {
            theirs.set_peer_identity(id.clone());
        }

        acceptor.accept(theirs)?;
        debug!(name, pipe = %ours.id(), "[INPROC] connected");
        Ok(ours)
    }

    /// Currently bound names, without the `inproc://` prefix.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every binding. Called at context teardown.
    pub fn clear(&self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use bytes::Bytes;
    use parking_lot::Mutex;

    struct Collector {
        socket_type: SocketType,
        options: SocketOptions,
        accepted: Mutex<Vec<PipeEnd>>,
    }

    impl Collector {
        fn new(socket_type: SocketType, options: SocketOptions) -> Arc<Self> {
            Arc::new(Self {
                socket_type,
                options,
                accepted: Mutex::new(Vec::new()),
            })
        }
    }

    impl InprocAcceptor for Collector {
        fn socket_type(&self) -> SocketType {
            self.socket_type
        }

        fn options(&self) -> &SocketOptions {
            &self.options
        }

        fn accept(&self, pipe: PipeEnd) -> Result<()> {
            self.accepted.lock().push(pipe);
            Ok(())
        }
    }

    #[test]
    fn bind_twice_is_addr_in_use() {
        let registry = InprocRegistry::new();
        let acceptor = Collector::new(SocketType::Router, SocketOptions::new());
        registry.bind("dup", 1, acceptor.clone()).unwrap();
        assert!(matches!(
            registry.bind("dup", 2, acceptor),
            Err(TappetError::AddrInUse(_))
        ));
    }

    #[test]
    fn connect_hands_pipe_to_binder() {
        let registry = InprocRegistry::new();
        let binder = Collector::new(
            SocketType::Router,
            SocketOptions::new().with_routing_id(Bytes::from_static(b"R")),
        );
        registry.bind("svc", 1, binder.clone()).unwrap();

        let client_opts = SocketOptions::new()
            .with_routing_id(Bytes::from_static(b"D"))
            .with_send_hwm(2)
            .with_recv_hwm(2);
        let ours = registry.connect("svc", SocketType::Dealer, &client_opts).unwrap();
        assert_eq!(ours.peer_identity().unwrap(), &Bytes::from_static(b"R"));

        let accepted = binder.accepted.lock();
        assert_eq!(accepted.len(), 1);
        let theirs = &accepted[0];
        assert_eq!(theirs.peer_identity().unwrap(), &Bytes::from_static(b"D"));

        ours.try_write(Message::from("hello")).unwrap();
        assert_eq!(theirs.try_read().unwrap(), Message::from("hello"));
    }

    #[test]
    fn unknown_name_is_endpoint_not_found() {
        let registry = InprocRegistry::new();
        assert!(matches!(
            registry.connect("missing", SocketType::Dealer, &SocketOptions::new()),
            Err(TappetError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn connect_after_unbind_fails() {
        let registry = InprocRegistry::new();
        let binder = Collector::new(SocketType::Pull, SocketOptions::new());
        registry.bind("gone", 7, binder).unwrap();

        // Only the owner may unbind.
        assert!(registry.unbind("gone", 8).is_err());
        registry.unbind("gone", 7).unwrap();

        assert!(matches!(
            registry.connect("gone", SocketType::Push, &SocketOptions::new()),
            Err(TappetError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn incompatible_types_are_rejected() {
        let registry = InprocRegistry::new();
        registry
            .bind("pair", 1, Collector::new(SocketType::Pair, SocketOptions::new()))
            .unwrap();
        assert!(matches!(
            registry.connect("pair", SocketType::Dealer, &SocketOptions::new()),
            Err(TappetError::IncompatibleSocket { .. })
        ));
    }

    #[test]
    fn clear_and_unbind_all() {
        let registry = InprocRegistry::new();
        registry
            .bind("a", 1, Collector::new(SocketType::Pub, SocketOptions::new()))
            .unwrap();
        registry
            .bind("b", 1, Collector::new(SocketType::Pub, SocketOptions::new()))
            .unwrap();
        registry
            .bind("c", 2, Collector::new(SocketType::Pub, SocketOptions::new()))
            .unwrap();

        registry.unbind_all(1);
        assert_eq!(registry.endpoints(), vec!["c".to_string()]);
        registry.clear();
        assert!(registry.endpoints().is_empty());
    }
}
