//! PULL routing: fair-queued, receive only.

use crate::base::{FairQueue, PipeMap, Routing, SendError};
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId};

#[derive(Debug, Default)]
pub(crate) struct Pull {
    pipes: PipeMap,
    fq: FairQueue,
}

impl Pull {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Routing for Pull {
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

    fn send(&mut self, _msg: Message) -> std::result::Result<(), SendError> {
        Err(SendError::Failed(TappetError::NotSupported(
            "send on PULL socket",
        )))
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.fq.recv(&self.pipes).map(|(_, msg)| msg))
    }

    fn has_in(&mut self) -> bool {
        self.fq.has_in(&self.pipes)
    }

    fn has_out(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tappet_core::pipe;

    #[test]
    fn collects_from_all_pushers() {
        let mut pull = Pull::new();
        let (a, pusher_a) = pipe::pair(10, 10);
        let (b, pusher_b) = pipe::pair(10, 10);
        pull.attach(a);
        pull.attach(b);

        pusher_a.try_write(Message::from("a")).unwrap();
        pusher_b.try_write(Message::from("b")).unwrap();

        let mut got: Vec<Message> = std::iter::from_fn(|| pull.recv().unwrap()).collect();
        got.sort_by(|x, y| x.first().cmp(&y.first()));
        assert_eq!(got, vec![Message::from("a"), Message::from("b")]);
        assert!(matches!(
            pull.send(Message::from("x")),
            Err(SendError::Failed(TappetError::NotSupported(_)))
        ));
    }
}
