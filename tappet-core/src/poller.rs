//! Poller: a single-threaded readiness reactor built on `mio`.
//!
//! Each [`Poller`] owns a `mio::Poll`, a table of [`EventHandler`]s keyed by
//! [`Token`], and a timer heap. One loop iteration:
//!
//! 1. wait for readiness, bounded by the nearest timer deadline
//! 2. dispatch `ready` to every handler with an event, in event order
//! 3. drain the command channel (spawn / activate / close / shutdown)
//! 4. fire due timers
//!
//! Handlers are taken out of the table while they run, so a callback can
//! never re-enter itself. Callbacks must not block.
//!
//! Other threads talk to a running poller through a cloneable
//! [`PollerHandle`]: commands go over a `flume` channel and a `mio::Waker`
//! interrupts the wait.

use crate::error::{Result, TappetError};
use flume::{Receiver, Sender};
use hashbrown::{HashMap, HashSet};
use mio::{Events, Poll, Registry, Waker};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub use mio::{Interest, Token};

const WAKER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 256;

/// Readiness reported for one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A reactor-driven state machine (listener, connection engine, ...).
pub trait EventHandler: Send {
    /// Register event sources under `token`. Called once, on the reactor
    /// thread, before any other callback.
    fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()>;

    /// Remove event sources. Called once, right before the handler is dropped.
    fn deregister(&mut self, reactor: &mut Reactor);

    /// The handle registered under `token` is ready.
    fn ready(&mut self, token: Token, readiness: Readiness, reactor: &mut Reactor);

    /// Another thread asked this handler to re-evaluate its state.
    fn activated(&mut self, _token: Token, _reactor: &mut Reactor) {}

    /// A timer scheduled through [`Reactor::add_timer`] expired.
    fn timer(&mut self, _token: Token, _timer: TimerId, _reactor: &mut Reactor) {}

    /// Close requested (unbind, disconnect, shutdown). Handlers that need to
    /// linger call [`Reactor::remove`] later; the default removes at once.
    fn close(&mut self, token: Token, reactor: &mut Reactor) {
        reactor.remove(token);
    }
}

enum Command {
    Register(Token, Box<dyn EventHandler>),
    Activate(Token),
    Close(Token),
    Shutdown,
}

/// Cloneable, thread-safe handle to a poller.
#[derive(Clone)]
pub struct PollerHandle {
    commands: Sender<Command>,
    waker: Arc<Waker>,
    next_token: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl PollerHandle {
    /// Reserve a token for a handler that is about to be spawned.
    #[must_use]
    pub fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Hand a handler over to the reactor thread.
    ///
    /// # Errors
    ///
    /// `ContextTerminated` if the poller has exited.
    pub fn spawn(&self, handler: Box<dyn EventHandler>) -> Result<Token> {
        let token = self.next_token();
        self.spawn_with_token(token, handler)?;
        Ok(token)
    }

    /// Like [`spawn`](Self::spawn) with a token from [`next_token`](Self::next_token).
    ///
    /// # Errors
    ///
    /// `ContextTerminated` if the poller has exited.
    pub fn spawn_with_token(&self, token: Token, handler: Box<dyn EventHandler>) -> Result<()> {
        self.send(Command::Register(token, handler))
    }

    /// Ask the handler under `token` to re-evaluate (pipe activity).
    pub fn activate(&self, token: Token) {
        let _ = self.send(Command::Activate(token));
    }

    /// Ask the handler under `token` to close.
    pub fn close(&self, token: Token) {
        let _ = self.send(Command::Close(token));
    }

    /// Close every handler, then exit once all of them removed themselves.
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }

    /// Exit on the next loop iteration, dropping all handlers.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TappetError::ContextTerminated)?;
        self.wake();
        Ok(())
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            trace!(error = %e, "[POLLER] wake failed");
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: Instant,
    id: TimerId,
    token: Token,
}

/// Reactor services available to handlers during a callback.
pub struct Reactor {
    registry: Registry,
    handle: PollerHandle,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    cancelled: HashSet<TimerId>,
    next_timer: u64,
    spawned: Vec<(Token, Box<dyn EventHandler>)>,
    removed: Vec<Token>,
    closing: Vec<Token>,
    shutting_down: bool,
}

impl Reactor {
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn handle(&self) -> &PollerHandle {
        &self.handle
    }

    /// True once a graceful shutdown started.
    #[must_use]
    pub const fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Schedule `timer` on the handler under `token` after `after`.
    pub fn add_timer(&mut self, token: Token, after: Duration) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.push(Reverse(TimerEntry {
            deadline: Instant::now() + after,
            id,
            token,
        }));
        id
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Add a handler; it is registered after the current callback returns.
    pub fn spawn(&mut self, handler: Box<dyn EventHandler>) -> Token {
        let token = self.handle.next_token();
        self.spawned.push((token, handler));
        token
    }

    /// Deregister and drop the handler under `token` after the current
    /// callback returns.
    pub fn remove(&mut self, token: Token) {
        self.removed.push(token);
    }

    /// Ask another handler to close after the current callback returns.
    pub fn close(&mut self, token: Token) {
        self.closing.push(token);
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.timers.peek() {
            if self.cancelled.remove(&entry.id) {
                self.timers.pop();
                continue;
            }
            return Some(entry.deadline);
        }
        None
    }

    fn pop_due(&mut self, now: Instant) -> Option<(Token, TimerId)> {
        let deadline = self.next_deadline()?;
        if deadline > now {
            return None;
        }
        let Reverse(entry) = self.timers.pop()?;
        Some((entry.token, entry.id))
    }
}

/// The reactor loop.
pub struct Poller {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Box<dyn EventHandler>>,
    reactor: Reactor,
    commands: Receiver<Command>,
    ready: Vec<(Token, Readiness)>,
}

impl Poller {
    /// # Errors
    ///
    /// Fails if the OS poll instance or waker cannot be created.
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let registry = poll.registry().try_clone()?;
        let (tx, rx) = flume::unbounded();

        let handle = PollerHandle {
            commands: tx,
            waker,
            next_token: Arc::new(AtomicUsize::new(1)),
            stop: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            handlers: HashMap::new(),
            reactor: Reactor {
                registry,
                handle,
                timers: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_timer: 0,
                spawned: Vec::new(),
                removed: Vec::new(),
                closing: Vec::new(),
                shutting_down: false,
            },
            commands: rx,
            ready: Vec::with_capacity(EVENTS_CAPACITY),
        })
    }

    #[must_use]
    pub fn handle(&self) -> PollerHandle {
        self.reactor.handle.clone()
    }

    /// Number of live handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Register a handler from the thread that owns the poller.
    ///
    /// # Errors
    ///
    /// Returns the handler's registration error.
    pub fn register(&mut self, mut handler: Box<dyn EventHandler>) -> io::Result<Token> {
        let token = self.reactor.handle.next_token();
        handler.register(token, &mut self.reactor)?;
        self.handlers.insert(token, handler);
        self.settle();
        Ok(token)
    }

    /// Deregister and return the handler under `token`.
    pub fn unregister(&mut self, token: Token) -> Option<Box<dyn EventHandler>> {
        let mut handler = self.handlers.remove(&token)?;
        handler.deregister(&mut self.reactor);
        Some(handler)
    }

    /// Exit `run` on the next iteration. Callable from any thread via
    /// [`PollerHandle::stop`].
    pub fn stop(&self) {
        self.reactor.handle.stop();
    }

    /// Loop until stopped, or until a graceful shutdown has no handlers left.
    ///
    /// # Errors
    ///
    /// Only fails if the OS poll call itself fails.
    pub fn run(&mut self) -> io::Result<()> {
        while !self.should_exit() {
            self.run_once(None)?;
        }
        debug!(handlers = self.handlers.len(), "[POLLER] exiting");
        let tokens: Vec<Token> = self.handlers.keys().copied().collect();
        for token in tokens {
            drop(self.unregister(token));
        }
        Ok(())
    }

    /// One iteration: wait (at most `timeout`, or until the next timer),
    /// dispatch readiness, drain commands, fire due timers.
    ///
    /// # Errors
    ///
    /// Only fails if the OS poll call itself fails.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if self.reactor.handle.stop.load(Ordering::Acquire) {
            return Ok(());
        }

        let wait = match (timeout, self.reactor.next_deadline()) {
            (t, None) => t,
            (None, Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
            (Some(t), Some(deadline)) => {
                Some(t.min(deadline.saturating_duration_since(Instant::now())))
            }
        };

        match self.poll.poll(&mut self.events, wait) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        self.ready.clear();
        self.ready.extend(
            self.events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(|event| (event.token(), Readiness::from(event))),
        );

        let ready = std::mem::take(&mut self.ready);
        for &(token, readiness) in &ready {
            if let Some(mut handler) = self.handlers.remove(&token) {
                handler.ready(token, readiness, &mut self.reactor);
                self.handlers.insert(token, handler);
                self.settle();
            }
        }
        self.ready = ready;

        self.drain_commands();
        self.fire_timers();
        Ok(())
    }

    fn should_exit(&self) -> bool {
        self.reactor.handle.stop.load(Ordering::Acquire)
            || (self.reactor.shutting_down && self.handlers.is_empty())
    }

    /// Handle the commands queued before this call. Commands sent while
    /// draining (a handler re-activating itself) wait for the next iteration
    /// so I/O readiness and timers keep getting their turn.
    fn drain_commands(&mut self) {
        let queued = self.commands.len();
        for _ in 0..queued {
            let Ok(command) = self.commands.try_recv() else {
                break;
            };
            match command {
                Command::Register(token, mut handler) => {
                    if let Err(e) = handler.register(token, &mut self.reactor) {
                        warn!(?token, error = %e, "[POLLER] handler registration failed");
                        continue;
                    }
                    self.handlers.insert(token, handler);
                    if self.reactor.shutting_down {
                        self.reactor.closing.push(token);
                    }
                }
                Command::Activate(token) => {
                    if let Some(mut handler) = self.handlers.remove(&token) {
                        handler.activated(token, &mut self.reactor);
                        self.handlers.insert(token, handler);
                    }
                }
                Command::Close(token) => self.reactor.closing.push(token),
                Command::Shutdown => {
                    debug!(handlers = self.handlers.len(), "[POLLER] graceful shutdown");
                    self.reactor.shutting_down = true;
                    self.reactor.closing.extend(self.handlers.keys().copied());
                }
            }
            self.settle();
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some((token, id)) = self.reactor.pop_due(now) {
            if let Some(mut handler) = self.handlers.remove(&token) {
                handler.timer(token, id, &mut self.reactor);
                self.handlers.insert(token, handler);
                self.settle();
            }
        }
    }

    /// Apply spawns, close requests and removals queued by callbacks.
    fn settle(&mut self) {
        loop {
            let spawned = std::mem::take(&mut self.reactor.spawned);
            let closing = std::mem::take(&mut self.reactor.closing);
            let removed = std::mem::take(&mut self.reactor.removed);
            if spawned.is_empty() && closing.is_empty() && removed.is_empty() {
                return;
            }

            for (token, mut handler) in spawned {
                match handler.register(token, &mut self.reactor) {
                    Ok(()) => {
                        self.handlers.insert(token, handler);
                        if self.reactor.shutting_down {
                            self.reactor.closing.push(token);
                        }
                    }
                    Err(e) => warn!(?token, error = %e, "[POLLER] handler registration failed"),
                }
            }

            for token in closing {
                if let Some(mut handler) = self.handlers.remove(&token) {
                    handler.close(token, &mut self.reactor);
                    self.handlers.insert(token, handler);
                }
            }

            for token in removed {
                if let Some(mut handler) = self.handlers.remove(&token) {
                    handler.deregister(&mut self.reactor);
                    trace!(?token, "[POLLER] handler removed");
                }
            }
        }
    }
}

/// A poller running on its own named thread.
pub struct IoThread {
    handle: PollerHandle,
    thread: Option<JoinHandle<()>>,
}

impl IoThread {
    /// # Errors
    ///
    /// Fails if the poller or the OS thread cannot be created.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let mut poller = Poller::new()?;
        let handle = poller.handle();
        let name = name.into();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Err(e) = poller.run() {
                warn!(thread = %name, error = %e, "[POLLER] reactor failed");
            }
        })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub const fn handle(&self) -> &PollerHandle {
        &self.handle
    }

    /// Graceful shutdown: close all handlers, wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[POLLER] reactor thread panicked");
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.stop();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    /// Handler with no event source, driven by timers and activations only.
    struct Recorder {
        fired: Arc<AtomicUsize>,
        delays: Vec<Duration>,
        stop_after: usize,
    }

    impl EventHandler for Recorder {
        fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()> {
            for delay in &self.delays {
                reactor.add_timer(token, *delay);
            }
            Ok(())
        }

        fn deregister(&mut self, _reactor: &mut Reactor) {}

        fn ready(&mut self, _token: Token, _readiness: Readiness, _reactor: &mut Reactor) {}

        fn activated(&mut self, _token: Token, reactor: &mut Reactor) {
            if self.fired.fetch_add(1, Ordering::SeqCst) + 1 >= self.stop_after {
                reactor.handle().stop();
            }
        }

        fn timer(&mut self, token: Token, timer: TimerId, reactor: &mut Reactor) {
            self.activated(token, reactor);
            let _ = timer;
        }
    }

    #[test]
    fn timers_fire_and_stop_the_loop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::new().unwrap();
        poller
            .register(Box::new(Recorder {
                fired: fired.clone(),
                delays: vec![Duration::from_millis(5), Duration::from_millis(15)],
                stop_after: 2,
            }))
            .unwrap();

        let start = Instant::now();
        poller.run().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        struct Canceller {
            fired: Arc<AtomicUsize>,
        }

        impl EventHandler for Canceller {
            fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()> {
                let doomed = reactor.add_timer(token, Duration::from_millis(1));
                reactor.cancel_timer(doomed);
                reactor.add_timer(token, Duration::from_millis(20));
                Ok(())
            }

            fn deregister(&mut self, _reactor: &mut Reactor) {}

            fn ready(&mut self, _token: Token, _readiness: Readiness, _reactor: &mut Reactor) {}

            fn timer(&mut self, _token: Token, _timer: TimerId, reactor: &mut Reactor) {
                self.fired.fetch_add(1, Ordering::SeqCst);
                reactor.handle().stop();
            }
        }

        let fired = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::new().unwrap();
        poller
            .register(Box::new(Canceller {
                fired: fired.clone(),
            }))
            .unwrap();
        poller.run().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spawn_and_activate_from_another_thread() {
        let fired = Arc::new(AtomicUsize::new(0));
        let io = IoThread::spawn("poller-test").unwrap();

        let token = io
            .handle()
            .spawn(Box::new(Recorder {
                fired: fired.clone(),
                delays: Vec::new(),
                stop_after: 3,
            }))
            .unwrap();
        for _ in 0..3 {
            io.handle().activate(token);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn self_activation_waits_for_next_iteration() {
        struct Spinner {
            runs: Arc<AtomicUsize>,
        }

        impl EventHandler for Spinner {
            fn register(&mut self, _token: Token, _reactor: &mut Reactor) -> io::Result<()> {
                Ok(())
            }

            fn deregister(&mut self, _reactor: &mut Reactor) {}

            fn ready(&mut self, _token: Token, _readiness: Readiness, _reactor: &mut Reactor) {}

            fn activated(&mut self, token: Token, reactor: &mut Reactor) {
                self.runs.fetch_add(1, Ordering::SeqCst);
                reactor.handle().activate(token);
            }
        }

        let runs = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::new().unwrap();
        let token = poller
            .register(Box::new(Spinner { runs: runs.clone() }))
            .unwrap();
        poller.handle().activate(token);

        for expected in 1..=3 {
            poller.run_once(Some(Duration::from_millis(100))).unwrap();
            assert_eq!(runs.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn stop_is_callable_from_any_thread() {
        let mut poller = Poller::new().unwrap();
        let handle = poller.handle();
        let runner = thread::spawn(move || poller.run());
        thread::sleep(Duration::from_millis(10));
        handle.stop();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn readable_listener_is_dispatched() {
        struct Acceptor {
            listener: TcpListener,
            accepted: Arc<AtomicUsize>,
        }

        impl EventHandler for Acceptor {
            fn register(&mut self, token: Token, reactor: &mut Reactor) -> io::Result<()> {
                reactor
                    .registry()
                    .register(&mut self.listener, token, Interest::READABLE)
            }

            fn deregister(&mut self, reactor: &mut Reactor) {
                let _ = reactor.registry().deregister(&mut self.listener);
            }

            fn ready(&mut self, _token: Token, readiness: Readiness, reactor: &mut Reactor) {
                assert!(readiness.readable);
                while self.listener.accept().is_ok() {
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                }
                reactor.handle().stop();
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let mut poller = Poller::new().unwrap();
        poller
            .register(Box::new(Acceptor {
                listener,
                accepted: accepted.clone(),
            }))
            .unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();
        poller.run().unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn graceful_shutdown_waits_for_lingering_handler() {
        struct Lingerer {
            closed_at: Arc<parking_lot::Mutex<Option<Instant>>>,
        }

        impl EventHandler for Lingerer {
            fn register(&mut self, _token: Token, _reactor: &mut Reactor) -> io::Result<()> {
                Ok(())
            }

            fn deregister(&mut self, _reactor: &mut Reactor) {
                *self.closed_at.lock() = Some(Instant::now());
            }

            fn ready(&mut self, _token: Token, _readiness: Readiness, _reactor: &mut Reactor) {}

            fn close(&mut self, token: Token, reactor: &mut Reactor) {
                reactor.add_timer(token, Duration::from_millis(30));
            }

            fn timer(&mut self, token: Token, _timer: TimerId, reactor: &mut Reactor) {
                reactor.remove(token);
            }
        }

        let closed_at = Arc::new(parking_lot::Mutex::new(None));
        let mut io = IoThread::spawn("poller-linger").unwrap();
        io.handle()
            .spawn(Box::new(Lingerer {
                closed_at: closed_at.clone(),
            }))
            .unwrap();

        let start = Instant::now();
        io.shutdown();
        let closed = (*closed_at.lock()).expect("handler deregistered");
        assert!(closed.duration_since(start) >= Duration::from_millis(30));
    }
}
