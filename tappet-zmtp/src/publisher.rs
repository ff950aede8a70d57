//! PUB routing.
//!
//! PUB sockets broadcast messages to every subscriber whose subscriptions
//! match the first frame. Subscribers tell the publisher what they want by
//! sending subscription messages (`0x01` + prefix, `0x00` + prefix), which
//! are folded into a per-subscriber [`SubscriptionSet`] before each publish.
//!
//! A subscriber at its HWM simply misses the message: the publisher never
//! blocks.

use crate::base::{PipeMap, Routing, SendError};
use hashbrown::HashMap;
use tappet_core::error::{Result, TappetError};
use tappet_core::message::Message;
use tappet_core::pipe::{PipeEnd, PipeId, TryWriteError};
use tappet_core::subscription::{SubscriptionEvent, SubscriptionSet};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct Pub {
    pipes: PipeMap,
    subscriptions: HashMap<PipeId, SubscriptionSet>,
}

impl Pub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply every subscription message queued by subscribers.
    pub(crate) fn process_subscriptions(&mut self) {
        for (id, pipe) in &self.pipes {
            let set = self.subscriptions.entry(*id).or_default();
            while let Ok(msg) = pipe.try_read() {
                match msg.first().and_then(SubscriptionEvent::from_message) {
                    Some(SubscriptionEvent::Subscribe(prefix)) => {
                        trace!(pipe = %id, prefix = ?prefix, "[PUB] subscribe");
                        set.subscribe(prefix);
                    }
                    Some(SubscriptionEvent::Unsubscribe(prefix)) => {
                        trace!(pipe = %id, prefix = ?prefix, "[PUB] unsubscribe");
                        set.unsubscribe(&prefix);
                    }
                    None => debug!(pipe = %id, "[PUB] ignoring non-subscription message"),
                }
            }
        }
    }
}

impl Routing for Pub {
    fn attach(&mut self, pipe: PipeEnd) {
        self.subscriptions.insert(pipe.id(), SubscriptionSet::new());
        self.pipes.insert(pipe.id(), pipe);
    }

    fn detach(&mut self, id: PipeId) -> Option<PipeEnd> {
        self.subscriptions.remove(&id);
        self.pipes.remove(&id)
    }

    fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    fn send(&mut self, msg: Message) -> std::result::Result<(), SendError> {
        self.process_subscriptions();

        let topic = msg.first().map_or(&[][..], |f| &f[..]);
        for (id, pipe) in &self.pipes {
            let wanted = self
                .subscriptions
                .get(id)
                .is_some_and(|set| set.matches(topic));
            if !wanted {
                continue;
            }
            match pipe.try_write(msg.clone()) {
                Ok(()) => {}
                Err(TryWriteError::Full(_)) => {
                    trace!(pipe = %id, "[PUB] subscriber at HWM, dropping");
                }
                Err(TryWriteError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        Err(TappetError::NotSupported("recv on PUB socket"))
    }

    fn has_in(&mut self) -> bool {
        false
    }

    fn has_out(&self) -> bool {
        true
    }

    fn reap(&mut self) {
        // Subscription messages count as inbound; fold them in first
        self.process_subscriptions();
        for id in crate::base::dead_pipes(&self.pipes) {
            if let Some(pipe) = self.detach(id) {
                trace!(pipe = %id, "[PUB] subscriber gone");
                pipe.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tappet_core::pipe;

    fn subscriber(publisher: &mut Pub, prefixes: &[&'static str], hwm: usize) -> PipeEnd {
        let (ours, theirs) = pipe::pair(hwm, 100);
        publisher.attach(ours);
        for prefix in prefixes {
            let event = SubscriptionEvent::Subscribe(Bytes::from_static(prefix.as_bytes()));
            theirs.try_write(Message::from(event.to_message())).unwrap();
        }
        theirs
    }

    #[test]
    fn delivers_only_to_matching_subscribers() {
        let mut publisher = Pub::new();
        let weather = subscriber(&mut publisher, &["weather"], 10);
        let all = subscriber(&mut publisher, &[""], 10);
        let none = subscriber(&mut publisher, &[], 10);

        publisher
            .send(Message::new().push_str("weather.paris").push_str("20C"))
            .unwrap();
        publisher.send(Message::from("sports")).unwrap();

        assert_eq!(weather.inbound_len(), 1);
        assert_eq!(all.inbound_len(), 2);
        assert_eq!(none.inbound_len(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut publisher = Pub::new();
        let sub = subscriber(&mut publisher, &["a"], 10);
        publisher.send(Message::from("a1")).unwrap();

        let event = SubscriptionEvent::Unsubscribe(Bytes::from_static(b"a"));
        sub.try_write(Message::from(event.to_message())).unwrap();
        publisher.send(Message::from("a2")).unwrap();

        assert_eq!(sub.try_read().unwrap(), Message::from("a1"));
        assert!(sub.try_read().is_err());
    }

    #[test]
    fn slow_subscriber_drops_without_blocking() {
        let mut publisher = Pub::new();
        let slow = subscriber(&mut publisher, &[""], 2);
        let fast = subscriber(&mut publisher, &[""], 100);

        for i in 0..10 {
            publisher
                .send(Message::from(format!("m{i}").as_str()))
                .unwrap();
        }
        assert_eq!(slow.inbound_len(), 2);
        assert_eq!(fast.inbound_len(), 10);
        assert_eq!(slow.try_read().unwrap(), Message::from("m0"));
    }

    #[test]
    fn recv_is_not_supported() {
        let mut publisher = Pub::new();
        assert!(matches!(
            publisher.recv(),
            Err(TappetError::NotSupported(_))
        ));
    }
}
