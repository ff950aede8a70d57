//! Routing infrastructure shared by all socket patterns.
//!
//! A pattern owns its pipe ends in a [`PipeMap`] and picks among them with
//! the two classic strategies:
//!
//! - [`LoadBalancer`]: round-robin over pipes with send capacity
//! - [`FairQueue`]: round-robin over pipes with pending messages
//!
//! Both keep only pipe ids. Ids whose pipe is gone from the map are dropped
//! the next time the rotation reaches them.

use hashbrown::HashMap;
use std::collections::VecDeque;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryReadError, TryWriteError};
use tracing::trace;

pub(crate) type PipeMap = HashMap<PipeId, PipeEnd>;

/// Why a pattern did not take a message.
#[derive(Debug)]
pub(crate) enum SendError {
    /// No pipe can take it now; retry after the next wakeup.
    Again(Message),
    Failed(TappetError),
}

impl From<TappetError> for SendError {
    fn from(e: TappetError) -> Self {
        Self::Failed(e)
    }
}

/// Common capability of every pattern.
pub(crate) trait Routing {
    /// Take ownership of a new pipe.
    fn attach(&mut self, pipe: PipeEnd);

    /// Forget a pipe and hand it back.
    fn detach(&mut self, id: PipeId) -> Option<PipeEnd>;

    fn pipes(&self) -> &PipeMap;

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError>;

    /// `Ok(None)` when nothing is available now.
    fn recv(&mut self) -> Result<Option<Message>>;

    fn has_in(&mut self) -> bool;

    fn has_out(&self) -> bool;

    /// Drop pipes whose peer went away for good.
    fn reap(&mut self) {
        for id in dead_pipes(self.pipes()) {
            if let Some(pipe) = self.detach(id) {
                trace!(pipe = %id, "[PATTERN] peer gone, pipe detached");
                pipe.close();
            }
        }
    }
}

/// Pipes whose peer closed and that have nothing left to read.
pub(crate) fn dead_pipes(pipes: &PipeMap) -> Vec<PipeId> {
    pipes
        .values()
        .filter(|pipe| pipe.is_peer_closed() && !pipe.has_inbound())
        .map(PipeEnd::id)
        .collect()
}

#[derive(Debug, Default)]
pub(crate) struct LoadBalancer {
    order: VecDeque<PipeId>,
}

impl LoadBalancer {
    pub(crate) fn attach(&mut self, id: PipeId) {
        self.order.push_back(id);
    }

    pub(crate) fn detach(&mut self, id: PipeId) {
        self.order.retain(|p| *p != id);
    }

    /// Write `msg` to the next pipe with capacity.
    ///
    /// Returns the chosen pipe, or the message when every pipe is full.
    pub(crate) fn send(
        &mut self,
        pipes: &PipeMap,
        mut msg: Message,
    ) -> std::result::Result<PipeId, Message> {
        for _ in 0..self.order.len() {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            let Some(pipe) = pipes.get(&id) else {
                continue;
            };
            match pipe.try_write(msg) {
                Ok(()) => {
                    self.order.push_back(id);
                    return Ok(id);
                }
                Err(TryWriteError::Full(back)) => {
                    self.order.push_back(id);
                    msg = back;
                }
                Err(TryWriteError::Closed(back)) => {
                    trace!(pipe = %id, "[LB] skipping closed pipe");
                    self.order.push_back(id);
                    msg = back;
                }
            }
        }
        Err(msg)
    }

    pub(crate) fn has_out(&self, pipes: &PipeMap) -> bool {
        self.order
            .iter()
            .filter_map(|id| pipes.get(id))
            .any(PipeEnd::has_capacity)
    }
}

#[derive(Debug, Default)]
pub(crate) struct FairQueue {
    order: VecDeque<PipeId>,
}

impl FairQueue {
    pub(crate) fn attach(&mut self, id: PipeId) {
        self.order.push_back(id);
    }

    pub(crate) fn detach(&mut self, id: PipeId) {
        self.order.retain(|p| *p != id);
    }

    /// Read from the next pipe with a pending message.
    pub(crate) fn recv(&mut self, pipes: &PipeMap) -> Option<(PipeId, Message)> {
        for _ in 0..self.order.len() {
            let id = self.order.pop_front()?;
            let Some(pipe) = pipes.get(&id) else {
                continue;
            };
            self.order.push_back(id);
            match pipe.try_read() {
                Ok(msg) => return Some((id, msg)),
                Err(TryReadError::Empty | TryReadError::Terminated) => {}
            }
        }
        None
    }

    pub(crate) fn has_in(&self, pipes: &PipeMap) -> bool {
        self.order
            .iter()
            .filter_map(|id| pipes.get(id))
            .any(PipeEnd::has_inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tappet_core::pipe;

    fn map_with(n: usize, hwm: usize) -> (PipeMap, Vec<PipeEnd>) {
        let mut map = PipeMap::new();
        let mut peers = Vec::new();
        for _ in 0..n {
            let (ours, theirs) = pipe::pair(hwm, hwm);
            map.insert(ours.id(), ours);
            peers.push(theirs);
        }
        (map, peers)
    }

    #[test]
    fn load_balancer_round_robins() {
        let (map, peers) = map_with(3, 10);
        let mut lb = LoadBalancer::default();
        for peer in &peers {
            lb.attach(peer.id());
        }

        for i in 0..6 {
            lb.send(&map, Message::from(format!("m{i}").as_str()))
                .unwrap();
        }
        for peer in &peers {
            assert_eq!(peer.inbound_len(), 2);
        }
    }

    #[test]
    fn load_balancer_skips_full_pipes() {
        let (map, peers) = map_with(2, 1);
        let mut lb = LoadBalancer::default();
        for peer in &peers {
            lb.attach(peer.id());
        }

        assert!(lb.send(&map, Message::from("a")).is_ok());
        assert!(lb.send(&map, Message::from("b")).is_ok());
        assert!(!lb.has_out(&map));
        let back = lb.send(&map, Message::from("c")).unwrap_err();
        assert_eq!(back, Message::from("c"));

        peers[0].try_read().unwrap();
        assert!(lb.has_out(&map));
        assert_eq!(lb.send(&map, Message::from("c")).unwrap(), peers[0].id());
    }

    #[test]
    fn fair_queue_alternates_between_sources() {
        let (map, peers) = map_with(2, 10);
        let mut fq = FairQueue::default();
        for peer in &peers {
            fq.attach(peer.id());
            peer.try_write(Message::from("x")).unwrap();
            peer.try_write(Message::from("y")).unwrap();
        }

        let order: Vec<PipeId> = std::iter::from_fn(|| fq.recv(&map).map(|(id, _)| id)).collect();
        assert_eq!(order.len(), 4);
        assert_ne!(order[0], order[1]);
        assert_ne!(order[2], order[3]);
        assert!(!fq.has_in(&map));
    }

    #[test]
    fn detached_pipes_are_dropped_from_rotation() {
        let (mut map, peers) = map_with(2, 10);
        let mut fq = FairQueue::default();
        for peer in &peers {
            fq.attach(peer.id());
        }
        peers[1].try_write(Message::from("z")).unwrap();
        map.remove(&peers[0].id());

        assert_eq!(fq.recv(&map).unwrap().0, peers[1].id());
    }

    #[test]
    fn dead_pipe_detection_waits_for_drain() {
        let (map, mut peers) = map_with(1, 10);
        peers[0].try_write(Message::from("last")).unwrap();
        drop(peers.pop());

        assert!(dead_pipes(&map).is_empty());
        let pipe = map.values().next().unwrap();
        pipe.try_read().unwrap();
        assert_eq!(dead_pipes(&map), vec![pipe.id()]);
    }
}
