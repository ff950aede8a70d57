//! REQ routing.
//!
//! REQ sockets implement the client side of request-reply:
//! - Send a request, then receive exactly one reply
//! - Requests are load-balanced across peers
//! - Each request is prefixed with an empty delimiter frame, stripped again
//!   from the reply
//!
//! Only the reply coming from the pipe the request went to is accepted.
//! Anything else that arrives meanwhile is discarded.

use crate::base::{LoadBalancer, PipeMap, Routing, SendError};
use bytes::Bytes;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId};
use tracing::trace;

#[derive(Debug, Default)]
pub(crate) struct Req {
    pipes: PipeMap,
    lb: LoadBalancer,
    /// Pipe the outstanding request went to.
    reply_pipe: Option<PipeId>,
    awaiting_reply: bool,
}

impl Req {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Discard everything queued on pipes we expect nothing from.
    fn drain_stray(&self) {
        for (id, pipe) in &self.pipes {
            if Some(*id) == self.reply_pipe {
                continue;
            }
            while pipe.try_read().is_ok() {
                trace!(pipe = %id, "[REQ] discarding unexpected message");
            }
        }
    }
}

impl Routing for Req {
    fn attach(&mut self, pipe: PipeEnd) {
        self.lb.attach(pipe.id());
        self.pipes.insert(pipe.id(), pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        self.lb.detach(id);
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, mut msg: Message) -> std::result::Result<(), SendError> {
        if self.awaiting_reply {
            return Err(SendError::Failed(TappetError::FiniteStateMachine(
                "REQ cannot send again before receiving the reply",
            )));
        }

        msg.push_front(Bytes::new());
        match self.lb.send(&self.pipes, msg) {
            Ok(id) => {
                self.reply_pipe = Some(id);
                self.awaiting_reply = true;
                Ok(())
            }
            Err(mut back) => {
                back.pop_front();
                Err(SendError::Again(back))
            }
        }
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        if !self.awaiting_reply {
            return Err(TappetError::FiniteStateMachine(
                "REQ must send a request before receiving",
            ));
        }

        self.drain_stray();
        let Some(pipe) = self.reply_pipe.and_then(|id| self.pipes.get(&id)) else {
            return Ok(None);
        };
        while let Ok(mut msg) = pipe.try_read() {
            if msg.first().is_some_and(Bytes::is_empty) {
                msg.pop_front();
                self.awaiting_reply = false;
                self.reply_pipe = None;
                return Ok(Some(msg));
            }
            trace!(pipe = %pipe.id(), "[REQ] discarding reply without delimiter");
        }
        Ok(None)
    }

    fn has_in(&mut self) -> bool {
        self.awaiting_reply
            && self
                .reply_pipe
                .and_then(|id| self.pipes.get(&id))
                .is_some_and(PipeEnd::has_inbound)
    }

    fn has_out(&self) -> bool {
        !self.awaiting_reply && self.lb.has_out(&self.pipes)
    }
}
