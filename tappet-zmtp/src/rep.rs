//! REP routing.
//!
//! REP sockets implement the server side of request-reply: receive a
//! request, then send exactly one reply. Requests are fair-queued across
//! peers. The envelope of each request (every frame up to and including the
//! empty delimiter) is kept aside and put back in front of the reply, which
//! goes to the peer the request came from.

use crate::base::{FairQueue, PipeMap, Routing, SendError};
use bytes::Bytes;
use smallvec::SmallVec;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryWriteError};
use tracing::trace;

type Envelope = SmallVec<[Bytes; 4]>;

#[derive(Debug, Default)]
pub(crate) struct Rep {
    pipes: PipeMap,
    fq: FairQueue,
    /// Origin and envelope of the request being served.
    pending: Option<(PipeId, Envelope)>,
}

impl Rep {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Split a request into envelope and body. `None` if there is no delimiter.
fn split_envelope(msg: Message) -> Option<(Envelope, Message)> {
    let mut frames = msg.into_iter();
    let mut envelope = Envelope::new();
    for frame in frames.by_ref() {
        let delimiter = frame.is_empty();
        envelope.push(frame);
        if delimiter {
            return Some((envelope, frames.collect()));
        }
    }
    None
}

impl Routing for Rep {
    fn attach(&mut self, pipe: PipeEnd) {
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

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        let Some((id, envelope)) = self.pending.take() else {
            return Err(SendError::Failed(TappetError::FiniteStateMachine(
                "REP must receive a request before replying",
            )));
        };

        let Some(pipe) = self.pipes.get(&id) else {
            trace!(pipe = %id, "[REP] requester gone, dropping reply");
            return Ok(());
        };

        let reply: Message = envelope.iter().cloned().chain(msg).collect();
        match pipe.try_write(reply) {
            Ok(()) => Ok(()),
            Err(TryWriteError::Full(reply)) => {
                let mut frames = reply.into_frames();
                let body = frames.split_off(envelope.len());
                self.pending = Some((id, envelope));
                Err(SendError::Again(Message::from(body)))
            }
            Err(TryWriteError::Closed(_)) => {
                trace!(pipe = %id, "[REP] requester closed, dropping reply");
                Ok(())
            }
        }
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        if self.pending.is_some() {
            return Err(TappetError::FiniteStateMachine(
                "REP must reply before receiving the next request",
            ));
        }

        while let Some((id, msg)) = self.fq.recv(&self.pipes) {
            match split_envelope(msg) {
                Some((envelope, body)) => {
                    self.pending = Some((id, envelope));
                    return Ok(Some(body));
                }
                None => trace!(pipe = %id, "[REP] discarding request without delimiter"),
            }
        }
        Ok(None)
    }

    fn has_in(&mut self) -> bool {
        self.pending.is_none() && self.fq.has_in(&self.pipes)
    }

    fn has_out(&self) -> bool {
        match &self.pending {
            Some((id, _)) => self.pipes.get(id).map_or(true, PipeEnd::has_capacity),
            None => false,
        }
    }
}
