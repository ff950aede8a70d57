//! Closed set of socket patterns, dispatched by variant.

use crate::base::{PipeMap, Routing, SendError};
use crate::dealer::Dealer;
use crate::pair::Pair;
use crate::publisher::Pub;
use crate::pull::Pull;
use crate::push::Push;
use crate::rep::Rep;
use crate::req::Req;
use crate::router::Router;
use crate::subscriber::Sub;
use bytes::Bytes;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::options::SocketOptions;
use tappet_core::pipe::{PipeEnd, PipeId};
use tappet_core::socket_type::SocketType;

#[derive(Debug)]
pub(crate) enum Pattern {
    Pair(Pair),
    Pub(Pub),
    Sub(Sub),
    Req(Req),
    Rep(Rep),
    Dealer(Dealer),
    Router(Router),
    Pull(Pull),
    Push(Push),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Pattern::Pair($p) => $body,
            Pattern::Pub($p) => $body,
            Pattern::Sub($p) => $body,
            Pattern::Req($p) => $body,
            Pattern::Rep($p) => $body,
            Pattern::Dealer($p) => $body,
            Pattern::Router($p) => $body,
            Pattern::Pull($p) => $body,
            Pattern::Push($p) => $body,
        }
    };
}

impl Pattern {
    pub(crate) fn new(socket_type: SocketType, options: &SocketOptions) -> Self {
        match socket_type {
            SocketType::Pair => Self::Pair(Pair::new()),
            SocketType::Pub => Self::Pub(Pub::new()),
            SocketType::Sub => Self::Sub(Sub::new()),
            SocketType::Req => Self::Req(Req::new()),
            SocketType::Rep => Self::Rep(Rep::new()),
            SocketType::Dealer => Self::Dealer(Dealer::new()),
            SocketType::Router => Self::Router(Router::new(options.router_mandatory)),
            SocketType::Pull => Self::Pull(Pull::new()),
            SocketType::Push => Self::Push(Push::new()),
        }
    }

    pub(crate) fn attach(&mut self, pipe: PipeEnd) {
        dispatch!(self, p => p.attach(pipe));
    }

    pub(crate) fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        dispatch!(self, p => p.detach(id))
    }

    pub(crate) fn pipes(&self) -> &PipeMap {
        dispatch!(self, p => p.pipes())
    }

    pub(crate) fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        dispatch!(self, p => p.send(msg))
    }

    pub(crate) fn recv(&mut self) -> Result<Option<Message>> {
        dispatch!(self, p => p.recv())
    }

    pub(crate) fn has_in(&mut self) -> bool {
        dispatch!(self, p => p.has_in())
    }

    pub(crate) fn has_out(&self) -> bool {
        dispatch!(self, p => p.has_out())
    }

    pub(crate) fn reap(&mut self) {
        dispatch!(self, p => p.reap());
    }

    /// Detach and close every pipe.
    pub(crate) fn close_all(&mut self) {
        let ids: Vec<PipeId> = self.pipes().keys().copied().collect();
        for id in ids {
            if let Some(pipe) = self.detach(id) {
                pipe.close();
            }
        }
    }

    pub(crate) fn subscribe(&mut self, prefix: Bytes) -> Result<()> {
        match self {
            Self::Sub(sub) => {
                sub.subscribe(prefix);
                Ok(())
            }
            _ => Err(TappetError::NotSupported("subscribe on non-SUB socket")),
        }
    }

    pub(crate) fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        match self {
            Self::Sub(sub) => {
                sub.unsubscribe(prefix);
                Ok(())
            }
            _ => Err(TappetError::NotSupported("unsubscribe on non-SUB socket")),
        }
    }

    /// Pick up option changes that affect routing.
    pub(crate) fn apply_options(&mut self, options: &SocketOptions) {
        if let Self::Router(router) = self {
            router.set_mandatory(options.router_mandatory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tappet_core::pipe;

    #[test]
    fn subscribe_only_on_sub() {
        let options = SocketOptions::default();
        let mut sub = Pattern::new(SocketType::Sub, &options);
        assert!(sub.subscribe(Bytes::from_static(b"x")).is_ok());

        let mut dealer = Pattern::new(SocketType::Dealer, &options);
        assert!(matches!(
            dealer.subscribe(Bytes::new()),
            Err(TappetError::NotSupported(_))
        ));
    }

    #[test]
    fn close_all_closes_peers() {
        let mut pattern = Pattern::new(SocketType::Push, &SocketOptions::default());
        let (ours, peer) = pipe::pair(10, 10);
        pattern.attach(ours);

        pattern.close_all();
        assert!(pattern.pipes().is_empty());
        assert!(peer.is_peer_closed());
    }

    #[test]
    fn router_mandatory_follows_options() {
        let mut router = Pattern::new(SocketType::Router, &SocketOptions::default());
        let msg = || Message::new().push_str("ghost").push_str("x");
        assert!(router.send(msg()).is_ok());

        router.apply_options(&SocketOptions::default().with_router_mandatory(true));
        assert!(matches!(
            router.send(msg()),
            Err(SendError::Failed(TappetError::HostUnreachable))
        ));
    }
}
