//! Pipe: a bounded, flow-controlled queue of messages between two owners.
//!
//! A pipe has two [`PipeEnd`]s. Each end writes into one direction and reads
//! from the other, so every direction is single-producer / single-consumer.
//! Ends are shared between the application thread (socket side) and a reactor
//! thread (engine side), or between two sockets for in-process transport.
//!
//! Flow control per direction:
//!
//! - `outstanding` counts enqueued minus dequeued messages and never exceeds
//!   the high-water mark (`hwm`, 0 = unbounded).
//! - A reader that finds the queue empty parks itself (`reader_asleep`); the
//!   next successful write clears the flag and fires `read_activated`.
//! - A writer that hits the HWM marks itself starved (`writer_starved`); the
//!   reader fires `write_activated` once `outstanding` drops to the low-water
//!   mark.
//!
//! All shared state is atomic. Wake hooks are invoked with no lock held.

use crate::message::Message;
use bytes::Bytes;
use flume::{Receiver, Sender};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

const ACTIVE: u8 = 0;
const TERMINATING: u8 = 1;
const TERMINATED: u8 = 2;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pipe identifier, shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(u64);

impl PipeId {
    fn next() -> Self {
        Self(NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe-{}", self.0)
    }
}

/// Lifecycle of one pipe direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Active,
    /// Writer closed; queued messages still drainable.
    Terminating,
    Terminated,
}

/// Wake hooks for the owner of a pipe end.
///
/// Implementations must not block: they run on whichever thread performed the
/// triggering read or write.
pub trait PipeEvents: Send + Sync {
    /// Inbound direction became non-empty, or the peer closed it.
    fn read_activated(&self, pipe: PipeId);

    /// Outbound direction regained capacity, or the peer stopped reading.
    fn write_activated(&self, pipe: PipeId);
}

/// Error returned by [`PipeEnd::try_write`]. The message is handed back.
#[derive(Debug)]
pub enum TryWriteError {
    /// HWM reached; retry after `write_activated`.
    Full(Message),
    /// The reader is gone or this end was closed.
    Closed(Message),
}

impl TryWriteError {
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Full(msg) | Self::Closed(msg) => msg,
        }
    }
}

/// Error returned by [`PipeEnd::try_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryReadError {
    /// Nothing queued; `read_activated` fires on the next write.
    Empty,
    /// Writer closed and everything has been drained.
    Terminated,
}

struct Queue {
    id: PipeId,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    outstanding: AtomicUsize,
    hwm: usize,
    lwm: usize,
    state: AtomicU8,
    reader_asleep: AtomicBool,
    writer_starved: AtomicBool,
    reader: OnceCell<Arc<dyn PipeEvents>>,
    writer: OnceCell<Arc<dyn PipeEvents>>,
}

impl Queue {
    fn new(id: PipeId, hwm: usize) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            id,
            tx,
            rx,
            outstanding: AtomicUsize::new(0),
            hwm,
            lwm: (hwm + 1) / 2,
            state: AtomicU8::new(ACTIVE),
            reader_asleep: AtomicBool::new(true),
            writer_starved: AtomicBool::new(false),
            reader: OnceCell::new(),
            writer: OnceCell::new(),
        }
    }

    fn state(&self) -> PipeState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => PipeState::Active,
            TERMINATING => PipeState::Terminating,
            _ => PipeState::Terminated,
        }
    }

    fn is_full(&self) -> bool {
        self.hwm > 0 && self.outstanding.load(Ordering::SeqCst) >= self.hwm
    }

    fn write(&self, msg: Message) -> Result<(), TryWriteError> {
        if self.state.load(Ordering::Acquire) != ACTIVE {
            return Err(TryWriteError::Closed(msg));
        }

        if self.is_full() {
            self.writer_starved.store(true, Ordering::SeqCst);
            // The reader may have freed a slot between the two loads.
            if self.is_full() {
                return Err(TryWriteError::Full(msg));
            }
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if let Err(flume::SendError(msg)) = self.tx.send(msg) {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(TryWriteError::Closed(msg));
        }

        if self.reader_asleep.swap(false, Ordering::SeqCst) {
            self.notify_reader();
        }
        Ok(())
    }

    fn read(&self) -> Result<Message, TryReadError> {
        // Load state before polling: a writer publishes its last message
        // before it flips to Terminating.
        let state = self.state.load(Ordering::Acquire);
        if let Ok(msg) = self.rx.try_recv() {
            self.consumed();
            return Ok(msg);
        }

        if state != ACTIVE {
            self.state.store(TERMINATED, Ordering::Release);
            return Err(TryReadError::Terminated);
        }

        self.reader_asleep.store(true, Ordering::SeqCst);
        match self.rx.try_recv() {
            Ok(msg) => {
                self.reader_asleep.store(false, Ordering::SeqCst);
                self.consumed();
                Ok(msg)
            }
            Err(_) => Err(TryReadError::Empty),
        }
    }

    fn consumed(&self) {
        let left = self.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        if left <= self.lwm && self.writer_starved.swap(false, Ordering::SeqCst) {
            self.notify_writer();
        }
    }

    /// Writer side close: Active -> Terminating.
    fn close_writer(&self) {
        if self
            .state
            .compare_exchange(ACTIVE, TERMINATING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify_reader();
        }
    }

    /// Reader side close: discard whatever is queued.
    fn close_reader(&self) {
        if self.state.swap(TERMINATED, Ordering::AcqRel) == TERMINATED {
            return;
        }
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        self.outstanding.store(0, Ordering::SeqCst);
        if dropped > 0 {
            trace!(pipe = %self.id, dropped, "[PIPE] discarded unread messages");
        }
        self.notify_writer();
    }

    fn notify_reader(&self) {
        if let Some(events) = self.reader.get() {
            events.read_activated(self.id);
        }
    }

    fn notify_writer(&self) {
        if let Some(events) = self.writer.get() {
            events.write_activated(self.id);
        }
    }
}

/// One end of a pipe.
///
/// Dropping an end closes it.
pub struct PipeEnd {
    id: PipeId,
    inbound: Arc<Queue>,
    outbound: Arc<Queue>,
    peer_identity: Option<Bytes>,
}

/// Create a pipe. `hwm_a_to_b` bounds messages written by the first end,
/// `hwm_b_to_a` those written by the second. 0 means unbounded.
#[must_use]
pub fn pair(hwm_a_to_b: usize, hwm_b_to_a: usize) -> (PipeEnd, PipeEnd) {
    let id = PipeId::next();
    let a_to_b = Arc::new(Queue::new(id, hwm_a_to_b));
    let b_to_a = Arc::new(Queue::new(id, hwm_b_to_a));

    let a = PipeEnd {
        id,
        inbound: Arc::clone(&b_to_a),
        outbound: Arc::clone(&a_to_b),
        peer_identity: None,
    };
    let b = PipeEnd {
        id,
        inbound: a_to_b,
        outbound: b_to_a,
        peer_identity: None,
    };
    (a, b)
}

impl PipeEnd {
    #[must_use]
    pub const fn id(&self) -> PipeId {
        self.id
    }

    /// Install this end's wake hooks. Only the first call takes effect.
    ///
    /// Hooks installed after traffic started miss earlier wakeups, so the
    /// owner must poll once after installing them.
    pub fn set_events(&self, events: Arc<dyn PipeEvents>) {
        let _ = self.inbound.reader.set(Arc::clone(&events));
        let _ = self.outbound.writer.set(events);
    }

    /// Enqueue without blocking.
    ///
    /// # Errors
    ///
    /// `Full` when the outbound HWM is reached, `Closed` once either end
    /// closed this direction.
    pub fn try_write(&self, msg: Message) -> Result<(), TryWriteError> {
        self.outbound.write(msg)
    }

    /// Dequeue without blocking.
    ///
    /// # Errors
    ///
    /// `Empty` when nothing is queued, `Terminated` once the peer closed and
    /// everything was drained.
    pub fn try_read(&self) -> Result<Message, TryReadError> {
        self.inbound.read()
    }

    /// Close both directions from this side.
    ///
    /// Messages already written stay readable by the peer; messages the peer
    /// wrote to us and we never read are discarded.
    pub fn close(&self) {
        self.outbound.close_writer();
        self.inbound.close_reader();
    }

    /// True when a read would return a message.
    #[must_use]
    pub fn has_inbound(&self) -> bool {
        !self.inbound.rx.is_empty()
    }

    /// True when a write would not hit the HWM and the peer is still reading.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.outbound.state.load(Ordering::Acquire) == ACTIVE && !self.outbound.is_full()
    }

    /// True once the peer closed its end.
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        self.inbound.state() != PipeState::Active || self.outbound.state() == PipeState::Terminated
    }

    /// True once the outbound direction was closed by this end and fully
    /// drained by the peer.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.outbound.state() == PipeState::Terminated
            || (self.outbound.state() == PipeState::Terminating && self.outbound.rx.is_empty())
    }

    #[must_use]
    pub fn inbound_state(&self) -> PipeState {
        self.inbound.state()
    }

    #[must_use]
    pub fn outbound_state(&self) -> PipeState {
        self.outbound.state()
    }

    /// Messages written by this end and not yet read by the peer.
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.outstanding.load(Ordering::SeqCst)
    }

    /// Messages waiting to be read by this end.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.outstanding.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peer_identity(&self) -> Option<&Bytes> {
        self.peer_identity.as_ref()
    }

    pub fn set_peer_identity(&mut self, identity: Bytes) {
        self.peer_identity = Some(identity);
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PipeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeEnd")
            .field("id", &self.id)
            .field("inbound", &self.inbound.state())
            .field("outbound", &self.outbound.state())
            .field("peer_identity", &self.peer_identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default)]
    struct Counter {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl PipeEvents for Counter {
        fn read_activated(&self, _pipe: PipeId) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn write_activated(&self, _pipe: PipeId) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn msg(s: &str) -> Message {
        Message::from(s)
    }

    #[test]
    fn hwm_bounds_outstanding_messages() {
        let (a, b) = pair(3, 3);
        for i in 0..3 {
            a.try_write(msg(&i.to_string())).unwrap();
        }
        match a.try_write(msg("overflow")) {
            Err(TryWriteError::Full(m)) => assert_eq!(m, msg("overflow")),
            other => panic!("expected Full, got {other:?}"),
        }
        assert!(!a.has_capacity());

        b.try_read().unwrap();
        assert!(a.has_capacity());
        a.try_write(msg("fits now")).unwrap();
        assert!(matches!(a.try_write(msg("again")), Err(TryWriteError::Full(_))));
    }

    #[test]
    fn zero_hwm_is_unbounded() {
        let (a, b) = pair(0, 0);
        for i in 0..10_000 {
            a.try_write(msg(&i.to_string())).unwrap();
        }
        assert_eq!(b.inbound_len(), 10_000);
    }

    #[test]
    fn fifo_order_preserved() {
        let (a, b) = pair(16, 16);
        for i in 0..16 {
            a.try_write(msg(&i.to_string())).unwrap();
        }
        for i in 0..16 {
            assert_eq!(b.try_read().unwrap(), msg(&i.to_string()));
        }
        assert_eq!(b.try_read(), Err(TryReadError::Empty));
    }

    #[test]
    fn zero_length_message_round_trips() {
        let (a, b) = pair(1, 1);
        let empty_frame = Message::new().push_empty();
        a.try_write(empty_frame.clone()).unwrap();
        let got = b.try_read().unwrap();
        assert_eq!(got, empty_frame);
        assert_eq!(got.get(0).unwrap().len(), 0);
    }

    #[test]
    fn reader_woken_on_empty_to_non_empty() {
        let (a, b) = pair(10, 10);
        let events = Arc::new(Counter::default());
        b.set_events(events.clone());

        // Reader starts asleep: first write wakes it.
        a.try_write(msg("1")).unwrap();
        a.try_write(msg("2")).unwrap();
        assert_eq!(events.reads.load(Ordering::SeqCst), 1);

        b.try_read().unwrap();
        b.try_read().unwrap();
        assert_eq!(b.try_read(), Err(TryReadError::Empty));

        a.try_write(msg("3")).unwrap();
        assert_eq!(events.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn starved_writer_activated_at_low_water_mark() {
        let (a, b) = pair(4, 4);
        let events = Arc::new(Counter::default());
        a.set_events(events.clone());

        for _ in 0..4 {
            a.try_write(msg("x")).unwrap();
        }
        assert!(matches!(a.try_write(msg("x")), Err(TryWriteError::Full(_))));

        // lwm = 2: draining to 3 is not enough.
        b.try_read().unwrap();
        assert_eq!(events.writes.load(Ordering::SeqCst), 0);
        b.try_read().unwrap();
        assert_eq!(events.writes.load(Ordering::SeqCst), 1);

        // Not starved any more: no further activations.
        b.try_read().unwrap();
        assert_eq!(events.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hwm_one_activates_after_every_dequeue() {
        let (a, b) = pair(1, 1);
        let events = Arc::new(Counter::default());
        a.set_events(events.clone());

        a.try_write(msg("1")).unwrap();
        assert!(matches!(a.try_write(msg("2")), Err(TryWriteError::Full(_))));
        b.try_read().unwrap();
        assert_eq!(events.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_drains_then_terminates() {
        let (a, b) = pair(10, 10);
        a.try_write(msg("1")).unwrap();
        a.try_write(msg("2")).unwrap();
        a.close();

        assert!(matches!(a.try_write(msg("late")), Err(TryWriteError::Closed(_))));
        assert!(b.is_peer_closed());
        assert_eq!(b.inbound_state(), PipeState::Terminating);

        assert_eq!(b.try_read().unwrap(), msg("1"));
        assert_eq!(b.try_read().unwrap(), msg("2"));
        assert_eq!(b.try_read(), Err(TryReadError::Terminated));
        assert_eq!(b.inbound_state(), PipeState::Terminated);
        assert!(a.is_flushed());
    }

    #[test]
    fn closing_reader_discards_and_wakes_writer() {
        let (a, b) = pair(10, 10);
        let events = Arc::new(Counter::default());
        a.set_events(events.clone());

        a.try_write(msg("never read")).unwrap();
        b.close();

        assert_eq!(events.writes.load(Ordering::SeqCst), 1);
        assert!(a.is_peer_closed());
        assert!(!a.has_capacity());
        assert!(matches!(a.try_write(msg("x")), Err(TryWriteError::Closed(_))));
    }

    #[test]
    fn drop_closes_end() {
        let (a, b) = pair(10, 10);
        a.try_write(msg("last words")).unwrap();
        drop(a);
        assert_eq!(b.try_read().unwrap(), msg("last words"));
        assert_eq!(b.try_read(), Err(TryReadError::Terminated));
    }

    #[test]
    fn concurrent_producer_consumer_keeps_order() {
        const N: usize = 20_000;
        let (a, b) = pair(64, 64);

        let producer = thread::spawn(move || {
            let mut i = 0usize;
            while i < N {
                match a.try_write(Message::from(i.to_be_bytes().to_vec())) {
                    Ok(()) => i += 1,
                    Err(TryWriteError::Full(_)) => thread::yield_now(),
                    Err(TryWriteError::Closed(_)) => panic!("reader vanished"),
                }
            }
            a
        });

        let mut expected = 0usize;
        while expected < N {
            match b.try_read() {
                Ok(m) => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(m.first().unwrap());
                    assert_eq!(usize::from_be_bytes(raw), expected);
                    assert!(b.inbound_len() <= 64);
                    expected += 1;
                }
                Err(TryReadError::Empty) => thread::yield_now(),
                Err(TryReadError::Terminated) => panic!("writer vanished"),
            }
        }
        drop(producer.join().unwrap());
    }

    #[test]
    fn peer_identity_is_per_end() {
        let (mut a, b) = pair(1, 1);
        a.set_peer_identity(Bytes::from_static(b"B"));
        assert_eq!(a.peer_identity().unwrap(), &Bytes::from_static(b"B"));
        assert!(b.peer_identity().is_none());
        assert_eq!(a.id(), b.id());
    }
}
