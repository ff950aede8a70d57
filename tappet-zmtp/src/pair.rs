//! PAIR routing.
//!
//! PAIR sockets connect exactly one peer. Messages flow both ways without
//! any envelope. A second peer is refused while the first is attached.

use crate::base::{PipeMap, Routing, SendError};
use tappet_core::error::Result;
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryWriteError};
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct Pair {
    pipes: PipeMap,
}

impl Pair {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn peer(&self) -> Option<&PipeEnd> {
        self.pipes.values().next()
    }
}

impl Routing for Pair {
    fn attach(&mut self, pipe: PipeEnd) {
        if !self.pipes.is_empty() {
            warn!(pipe = %pipe.id(), "[PAIR] already connected, refusing second peer");
            pipe.close();
            return;
        }
        self.pipes.insert(pipe.id(), pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        let Some(pipe) = self.peer() else {
            return Err(SendError::Again(msg));
        };
        pipe.try_write(msg).map_err(|e| match e {
            TryWriteError::Full(msg) | TryWriteError::Closed(msg) => SendError::Again(msg),
        })
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.peer().and_then(|pipe| pipe.try_read().ok()))
    }

    fn has_in(&mut self) -> bool {
        self.peer().is_some_and(PipeEnd::has_inbound)
    }

    fn has_out(&self) -> bool {
        self.peer().is_some_and(PipeEnd::has_capacity)
    }
}
