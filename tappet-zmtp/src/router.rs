//! ROUTER routing.
//!
//! ROUTER sockets receive messages with identity envelopes (first frame is
//! the sender identity) and route replies back to specific peers using that
//! identity.
//!
//! A peer's identity is the `Identity` property of its READY command (or the
//! connecting socket's `routing_id` for inproc). Peers without one get a
//! generated 5-byte identity: `0x00` followed by a big-endian counter.
//!
//! A second live peer announcing a taken identity is refused. A peer that
//! reconnects while its old pipe is still draining takes the identity over:
//! replies go to the new pipe and the old pipe's queued messages stay
//! readable under the same identity.

use crate::base::{FairQueue, PipeMap, Routing, SendError};
use bytes::{BufMut, Bytes, BytesMut};
use hashbrown::HashMap;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryWriteError};
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub(crate) struct Router {
    pipes: PipeMap,
    fq: FairQueue,
    by_identity: HashMap<Bytes, PipeId>,
    identities: HashMap<PipeId, Bytes>,
    mandatory: bool,
    next_id: u32,
}

impl Router {
    pub(crate) fn new(mandatory: bool) -> Self {
        Self {
            pipes: PipeMap::new(),
            fq: FairQueue::default(),
            by_identity: HashMap::new(),
            identities: HashMap::new(),
            mandatory,
            next_id: rand::random(),
        }
    }

    pub(crate) fn set_mandatory(&mut self, mandatory: bool) {
        self.mandatory = mandatory;
    }

    fn generate_identity(&mut self) -> Bytes {
        loop {
            let mut id = BytesMut::with_capacity(5);
            id.put_u8(0);
            id.put_u32(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            let id = id.freeze();
            if !self.by_identity.contains_key(&id) {
                return id;
            }
        }
    }

    /// Identity currently assigned to `pipe`.
    pub(crate) fn identity_of(&self, pipe: PipeId) -> Option<&Bytes> {
        self.identities.get(&pipe)
    }
}

impl Routing for Router {
    fn attach(&mut self, pipe: PipeEnd) {
        let id = pipe.id();
        let identity = match pipe.peer_identity().filter(|i| !i.is_empty()).cloned() {
            Some(identity) => match self.by_identity.get(&identity) {
                Some(old) if self.pipes.get(old).is_some_and(|p| !p.is_peer_closed()) => {
                    warn!(pipe = %id, peer_identity = ?identity, "[ROUTER] duplicate identity, rejecting peer");
                    pipe.close();
                    return;
                }
                Some(old) => {
                    debug!(pipe = %id, old = %old, peer_identity = ?identity, "[ROUTER] identity taken over");
                    identity
                }
                None => identity,
            },
            None => self.generate_identity(),
        };

        debug!(pipe = %id, peer_identity = ?identity, "[ROUTER] peer attached");
        self.by_identity.insert(identity.clone(), id);
        self.identities.insert(id, identity);
        self.fq.attach(id);
        self.pipes.insert(id, pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        if let Some(identity) = self.identities.remove(&id) {
            // Only if no newer pipe took the identity over
            if self.by_identity.get(&identity) == Some(&id) {
                self.by_identity.remove(&identity);
            }
        }
        self.fq.detach(id);
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, mut msg: Message) -> std::result::Result<(), SendError> {
        let Some(identity) = msg.pop_front() else {
            return Ok(());
        };
        if msg.is_empty() {
            trace!(peer_identity = ?identity, "[ROUTER] no payload after identity, dropping");
            return Ok(());
        }

        let pipe = self
            .by_identity
            .get(&identity)
            .and_then(|id| self.pipes.get(id));
        let Some(pipe) = pipe else {
            if self.mandatory {
                return Err(SendError::Failed(TappetError::HostUnreachable));
            }
            trace!(peer_identity = ?identity, "[ROUTER] unknown identity, dropping");
            return Ok(());
        };

        match pipe.try_write(msg) {
            Ok(()) => Ok(()),
            Err(TryWriteError::Full(mut back)) if self.mandatory => {
                back.push_front(identity);
                Err(SendError::Again(back))
            }
            Err(TryWriteError::Full(_)) => {
                trace!(peer_identity = ?identity, "[ROUTER] peer at HWM, dropping");
                Ok(())
            }
            Err(TryWriteError::Closed(_)) if self.mandatory => {
                Err(SendError::Failed(TappetError::HostUnreachable))
            }
            Err(TryWriteError::Closed(_)) => Ok(()),
        }
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        let Some((id, mut msg)) = self.fq.recv(&self.pipes) else {
            return Ok(None);
        };
        if let Some(identity) = self.identities.get(&id) {
            msg.push_front(identity.clone());
        }
        Ok(Some(msg))
    }

    fn has_in(&mut self) -> bool {
        self.fq.has_in(&self.pipes)
    }

    fn has_out(&self) -> bool {
        // Without mandatory routing a send never blocks
        !self.mandatory || self.pipes.values().any(PipeEnd::has_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tappet_core::pipe;

    fn peer(router: &mut Router, identity: Option<&'static [u8]>, hwm: usize) -> PipeEnd {
        let (mut ours, theirs) = pipe::pair(hwm, hwm);
        if let Some(identity) = identity {
            ours.set_peer_identity(Bytes::from_static(identity));
        }
        router.attach(ours);
        theirs
    }

    #[test]
    fn inbound_messages_carry_identity() {
        let mut router = Router::new(false);
        let a = peer(&mut router, Some(b"A"), 10);
        let b = peer(&mut router, Some(b"B"), 10);

        a.try_write(Message::from("ping")).unwrap();
        b.try_write(Message::from("ping")).unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = router.recv().unwrap() {
            assert_eq!(msg.len(), 2);
            assert_eq!(msg.get(1).unwrap(), &Bytes::from_static(b"ping"));
            seen.push(msg.first().unwrap().clone());
        }
        seen.sort();
        assert_eq!(seen, vec![Bytes::from_static(b"A"), Bytes::from_static(b"B")]);
    }

    #[test]
    fn outbound_messages_are_routed_by_identity() {
        let mut router = Router::new(false);
        let a = peer(&mut router, Some(b"A"), 10);
        let b = peer(&mut router, Some(b"B"), 10);

        router
            .send(Message::new().push_str("B").push_str("reply"))
            .unwrap();
        assert!(a.try_read().is_err());
        assert_eq!(b.try_read().unwrap(), Message::from("reply"));
    }

    #[test]
    fn unknown_identity_is_dropped_unless_mandatory() {
        let mut router = Router::new(false);
        assert!(router
            .send(Message::new().push_str("nobody").push_str("x"))
            .is_ok());

        router.set_mandatory(true);
        assert!(matches!(
            router.send(Message::new().push_str("nobody").push_str("x")),
            Err(SendError::Failed(TappetError::HostUnreachable))
        ));
    }

    #[test]
    fn full_peer_blocks_only_in_mandatory_mode() {
        let mut router = Router::new(true);
        let a = peer(&mut router, Some(b"A"), 1);

        router.send(Message::new().push_str("A").push_str("1")).unwrap();
        match router.send(Message::new().push_str("A").push_str("2")) {
            Err(SendError::Again(back)) => {
                assert_eq!(back, Message::new().push_str("A").push_str("2"));
            }
            other => panic!("expected Again, got {other:?}"),
        }

        router.set_mandatory(false);
        assert!(router.send(Message::new().push_str("A").push_str("3")).is_ok());
        assert_eq!(a.try_read().unwrap(), Message::from("1"));
        assert!(a.try_read().is_err());
    }

    #[test]
    fn anonymous_peers_get_generated_identities() {
        let mut router = Router::new(false);
        let a = peer(&mut router, None, 10);
        let _b = peer(&mut router, None, 10);

        let id_a = router.identity_of(a.id()).unwrap().clone();
        assert_eq!(id_a.len(), 5);
        assert_eq!(id_a[0], 0);
        assert_ne!(Some(&id_a), router.identity_of(_b.id()));

        a.try_write(Message::from("hi")).unwrap();
        let msg = router.recv().unwrap().unwrap();
        assert_eq!(msg.first().unwrap(), &id_a);
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let mut router = Router::new(false);
        let _first = peer(&mut router, Some(b"same"), 10);
        let second = peer(&mut router, Some(b"same"), 10);

        assert_eq!(router.pipes().len(), 1);
        assert!(second.is_peer_closed());
    }

    #[test]
    fn reconnected_peer_takes_over_identity() {
        let mut router = Router::new(true);
        let old = peer(&mut router, Some(b"A"), 10);
        old.try_write(Message::from("queued")).unwrap();
        old.close();

        let fresh = peer(&mut router, Some(b"A"), 10);
        assert_eq!(router.pipes().len(), 2);
        assert!(!fresh.is_peer_closed());

        router
            .send(Message::new().push_str("A").push_str("reply"))
            .unwrap();
        assert_eq!(fresh.try_read().unwrap(), Message::from("reply"));

        let msg = router.recv().unwrap().unwrap();
        assert_eq!(msg, Message::new().push_str("A").push_str("queued"));

        router.reap();
        assert_eq!(router.pipes().len(), 1);
        router
            .send(Message::new().push_str("A").push_str("still routed"))
            .unwrap();
        assert_eq!(fresh.try_read().unwrap(), Message::from("still routed"));
    }

    #[test]
    fn identity_without_payload_is_not_delivered() {
        let mut router = Router::new(true);
        let a = peer(&mut router, Some(b"A"), 10);

        router.send(Message::new().push_str("A")).unwrap();
        assert!(a.try_read().is_err());
    }

    #[test]
    fn detach_frees_the_identity() {
        let mut router = Router::new(true);
        let a = peer(&mut router, Some(b"A"), 10);
        drop(router.detach(a.id()));

        assert!(matches!(
            router.send(Message::new().push_str("A").push_str("x")),
            Err(SendError::Failed(TappetError::HostUnreachable))
        ));
        let _again = peer(&mut router, Some(b"A"), 10);
        assert_eq!(router.pipes().len(), 1);
    }
}
