//! Subscription prefixes for SUB filtering and PUB-side matching.
//!
//! Subscriptions are reference counted: subscribing twice to the same prefix
//! needs two unsubscribes before the prefix stops matching.

use bytes::Bytes;

/// Prefix set with per-prefix reference counts.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    entries: Vec<(Bytes, usize)>,
}

impl SubscriptionSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a subscription. Returns true if the prefix is new.
    pub fn subscribe(&mut self, prefix: Bytes) -> bool {
        if let Some((_, count)) = self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            *count += 1;
            return false;
        }
        self.entries.push((prefix, 1));
        true
    }

    /// Drop one reference. Returns true if the prefix is gone.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> bool {
        let Some(pos) = self.entries.iter().position(|(p, _)| p.as_ref() == prefix) else {
            return false;
        };
        self.entries[pos].1 -= 1;
        if self.entries[pos].1 == 0 {
            self.entries.swap_remove(pos);
            return true;
        }
        false
    }

    /// True if any prefix matches the start of `topic`.
    #[must_use]
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.entries.iter().any(|(p, _)| topic.starts_with(p))
    }

    /// Distinct prefixes currently subscribed.
    pub fn prefixes(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(|(p, _)| p)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Subscription control message carried as a data frame from SUB to PUB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Subscribe(Bytes),
    Unsubscribe(Bytes),
}

impl SubscriptionEvent {
    /// Parse a subscription message.
    ///
    /// Format: [0x01|0x00] [topic prefix...]
    #[must_use]
    pub fn from_message(msg: &Bytes) -> Option<Self> {
        let (&cmd, _) = msg.split_first()?;
        let prefix = msg.slice(1..);
        match cmd {
            0x01 => Some(Self::Subscribe(prefix)),
            0x00 => Some(Self::Unsubscribe(prefix)),
            _ => None,
        }
    }

    /// Encode this event as a subscription message.
    #[must_use]
    pub fn to_message(&self) -> Bytes {
        let (cmd, prefix) = match self {
            Self::Subscribe(p) => (0x01u8, p),
            Self::Unsubscribe(p) => (0x00u8, p),
        };

        let mut msg = Vec::with_capacity(1 + prefix.len());
        msg.push(cmd);
        msg.extend_from_slice(prefix);
        Bytes::from(msg)
    }

    #[must_use]
    pub const fn prefix(&self) -> &Bytes {
        match self {
            Self::Subscribe(p) | Self::Unsubscribe(p) => p,
        }
    }
}
