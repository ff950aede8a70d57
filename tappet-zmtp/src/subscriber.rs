//! SUB routing.
//!
//! SUB sockets fair-queue messages from publishers and only surface those
//! whose first frame starts with one of the subscribed prefixes. Every
//! subscription change is forwarded to all publishers, and replayed to a
//! publisher when it attaches, so filtering also happens upstream.

use crate::base::{FairQueue, PipeMap, Routing, SendError};
use bytes::Bytes;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryWriteError};
use tappet_core::subscription::{SubscriptionEvent, SubscriptionSet};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct Sub {
    pipes: PipeMap,
    fq: FairQueue,
    subscriptions: SubscriptionSet,
    /// Matching message pulled by `has_in`.
    prefetched: Option<Message>,
}

impl Sub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&mut self, prefix: Bytes) {
        if self.subscriptions.subscribe(prefix.clone()) {
            self.broadcast(&SubscriptionEvent::Subscribe(prefix));
        }
    }

    pub(crate) fn unsubscribe(&mut self, prefix: &[u8]) {
        if self.subscriptions.unsubscribe(prefix) {
            self.broadcast(&SubscriptionEvent::Unsubscribe(Bytes::copy_from_slice(
                prefix,
            )));
        }
    }

    fn broadcast(&self, event: &SubscriptionEvent) {
        let frame = event.to_message();
        for pipe in self.pipes.values() {
            send_event(pipe, frame.clone());
        }
    }

    fn next_matching(&mut self) -> Option<Message> {
        while let Some((id, msg)) = self.fq.recv(&self.pipes) {
            let topic = msg.first().map_or(&[][..], |f| &f[..]);
            if self.subscriptions.matches(topic) {
                return Some(msg);
            }
            trace!(pipe = %id, "[SUB] filtered out");
        }
        None
    }
}

fn send_event(pipe: &PipeEnd, frame: Bytes) {
    match pipe.try_write(Message::from(frame)) {
        Ok(()) => {}
        Err(TryWriteError::Full(_)) => {
            debug!(pipe = %pipe.id(), "[SUB] publisher at HWM, subscription update lost");
        }
        Err(TryWriteError::Closed(_)) => {}
    }
}

impl Routing for Sub {
    fn attach(&mut self, pipe: PipeEnd) {
        for prefix in self.subscriptions.prefixes() {
            send_event(&pipe, SubscriptionEvent::Subscribe(prefix.clone()).to_message());
        }
        self.fq.attach(pipe.id());
        self.pipes.insert(pipe.id(), pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        self.fq.detach(id);
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, _msg: Message) -> std::result::Result<(), SendError> {
        Err(SendError::Failed(TappetError::NotSupported(
            "send on SUB socket",
        )))
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        if let Some(msg) = self.prefetched.take() {
            return Ok(Some(msg));
        }
        Ok(self.next_matching())
    }

    fn has_in(&mut self) -> bool {
        if self.prefetched.is_none() {
            self.prefetched = self.next_matching();
        }
        self.prefetched.is_some()
    }

    fn has_out(&self) -> bool {
        false
    }
}
