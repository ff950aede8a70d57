//! PUSH routing: load-balanced, send only.

use crate::base::{LoadBalancer, PipeMap, Routing, SendError};
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId};

#[derive(Debug, Default)]
pub(crate) struct Push {
    pipes: PipeMap,
    lb: LoadBalancer,
}

impl Push {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Routing for Push {
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

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        self.lb
            .send(&self.pipes, msg)
            .map(drop)
            .map_err(SendError::Again)
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        Err(TappetError::NotSupported("recv on PUSH socket"))
    }

    fn has_in(&mut self) -> bool {
        false
    }

    fn has_out(&self) -> bool {
        self.lb.has_out(&self.pipes)
    }
}
