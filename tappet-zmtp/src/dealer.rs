//! DEALER routing.
//!
//! DEALER sockets are bidirectional asynchronous sockets that allow sending
//! and receiving messages freely without a strict request-reply pattern.
//! Outgoing messages are load-balanced across peers, incoming messages are
//! fair-queued. Messages are passed through untouched.

use crate::base::{FairQueue, LoadBalancer, PipeMap, Routing, SendError};
use tappet_core::error::Result;
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId};

#[derive(Debug, Default)]
pub(crate) struct Dealer {
    pipes: PipeMap,
    lb: LoadBalancer,
    fq: FairQueue,
}

impl Dealer {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Routing for Dealer {
    fn attach(&mut self, pipe: PipeEnd) {
        let id = pipe.id();
        self.lb.attach(id);
        self.fq.attach(id);
        self.pipes.insert(id, pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        self.lb.detach(id);
        self.fq.detach(id);
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        self.lb
            .send(&self.pipes, msg)
            .map(drop)
            .map_err(SendError::Again)
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.fq.recv(&self.pipes).map(|(_, msg)| msg))
    }

    fn has_in(&mut self) -> bool {
        self.fq.has_in(&self.pipes)
    }

    fn has_out(&self) -> bool {
        self.lb.has_out(&self.pipes)
    }
}
