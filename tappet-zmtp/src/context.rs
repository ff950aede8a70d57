//! Context: I/O threads plus the in-process registry.
//!
//! Every socket keeps a clone of its context, so the I/O threads outlive all
//! sockets. When the last clone goes away each reactor is asked to close its
//! handlers (engines flush up to their linger period) and the threads are
//! joined.

use crate::socket::Socket;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tappet_core::error::Result;
use tappet_core::inproc::InprocRegistry;
use tappet_core::poller::{IoThread, PollerHandle};
use tappet_core::socket_type::SocketType;
use tracing::debug;

struct ContextInner {
    io_threads: Vec<IoThread>,
    next_thread: AtomicUsize,
    next_socket_id: AtomicU64,
    registry: InprocRegistry,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        debug!(io_threads = self.io_threads.len(), "[CONTEXT] terminating");
        self.registry.clear();
        for thread in &self.io_threads {
            thread.handle().shutdown();
        }
        for thread in &mut self.io_threads {
            thread.shutdown();
        }
    }
}

/// Shared messaging context. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context with one I/O thread.
    ///
    /// # Errors
    ///
    /// Fails if the reactor thread cannot be started.
    pub fn new() -> Result<Self> {
        Self::with_io_threads(1)
    }

    /// Context with `count` I/O threads (at least one).
    ///
    /// # Errors
    ///
    /// Fails if a reactor thread cannot be started.
    pub fn with_io_threads(count: usize) -> Result<Self> {
        let io_threads = (0..count.max(1))
            .map(|i| IoThread::spawn(format!("tappet-io-{i}")))
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!(io_threads = io_threads.len(), "[CONTEXT] started");
        Ok(Self {
            inner: Arc::new(ContextInner {
                io_threads,
                next_thread: AtomicUsize::new(0),
                next_socket_id: AtomicU64::new(1),
                registry: InprocRegistry::new(),
            }),
        })
    }

    /// Create a socket of the given type.
    #[must_use]
    pub fn socket(&self, socket_type: SocketType) -> Socket {
        let id = self.inner.next_socket_id.fetch_add(1, Ordering::Relaxed);
        Socket::new(self.clone(), id, socket_type)
    }

    pub fn io_threads(&self) -> usize {
        self.inner.io_threads.len()
    }

    /// Bound inproc names.
    pub fn inproc_endpoints(&self) -> Vec<String> {
        self.inner.registry.endpoints()
    }

    pub(crate) fn registry(&self) -> &InprocRegistry {
        &self.inner.registry
    }

    /// Reactor for the next listener or connection, round-robin.
    pub(crate) fn next_io_thread(&self) -> PollerHandle {
        let threads = &self.inner.io_threads;
        let i = self.inner.next_thread.fetch_add(1, Ordering::Relaxed) % threads.len();
        threads[i].handle().clone()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("io_threads", &self.inner.io_threads.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_threads_are_used_round_robin() {
        let ctx = Context::with_io_threads(3).unwrap();
        assert_eq!(ctx.io_threads(), 3);

        let first = ctx.next_io_thread().next_token();
        for _ in 0..2 {
            ctx.next_io_thread();
        }
        // Back on the first thread: its token counter continues
        let again = ctx.next_io_thread().next_token();
        assert_eq!(again.0, first.0 + 1);
    }

    #[test]
    fn zero_threads_means_one() {
        let ctx = Context::with_io_threads(0).unwrap();
        assert_eq!(ctx.io_threads(), 1);
    }

    #[test]
    fn drop_joins_threads() {
        let ctx = Context::new().unwrap();
        let other = ctx.clone();
        drop(ctx);
        drop(other);
    }
}
