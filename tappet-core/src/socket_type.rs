//! Socket types and the peer compatibility matrix.
//!
//! The names are the ones exchanged in the ZMTP READY `Socket-Type`
//! property.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
    /// Exclusive bidirectional link to a single peer
    Pair = 0,

    /// Publisher: fan-out, never blocks
    Pub = 1,

    /// Subscriber: prefix-filtered fan-in
    Sub = 2,

    /// Strict request-reply client
    Req = 3,

    /// Strict request-reply server
    Rep = 4,

    /// Asynchronous load-balancing peer
    Dealer = 5,

    /// Identity-addressed router
    Router = 6,

    /// Fair-queued pipeline sink
    Pull = 7,

    /// Load-balanced pipeline source
    Push = 8,
}

impl SocketType {
    /// Get the socket type as its wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pair => "PAIR",
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::Req => "REQ",
            Self::Rep => "REP",
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
            Self::Pull => "PULL",
            Self::Push => "PUSH",
        }
    }

    /// Parse a wire name from a peer's READY command.
    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"PAIR" => Self::Pair,
            b"PUB" => Self::Pub,
            b"SUB" => Self::Sub,
            b"REQ" => Self::Req,
            b"REP" => Self::Rep,
            b"DEALER" => Self::Dealer,
            b"ROUTER" => Self::Router,
            b"PULL" => Self::Pull,
            b"PUSH" => Self::Push,
            _ => return None,
        })
    }

    /// Check if this socket type is compatible with the given peer type.
    #[must_use]
    pub const fn is_compatible(&self, peer: Self) -> bool {
        matches!(
            (self, peer),
            (Self::Pair, Self::Pair)
                | (Self::Pub, Self::Sub)
                | (Self::Sub, Self::Pub)
                | (Self::Req, Self::Rep)
                | (Self::Rep, Self::Req)
                | (Self::Req, Self::Router)
                | (Self::Router, Self::Req)
                | (Self::Dealer, Self::Rep)
                | (Self::Rep, Self::Dealer)
                | (Self::Dealer, Self::Router)
                | (Self::Router, Self::Dealer)
                | (Self::Dealer, Self::Dealer)
                | (Self::Router, Self::Router)
                | (Self::Push, Self::Pull)
                | (Self::Pull, Self::Push)
        )
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SocketType::*;

    const ALL: [SocketType; 9] = [Pair, Pub, Sub, Req, Rep, Dealer, Router, Pull, Push];

    #[test]
    fn wire_names_parse_back() {
        for ty in ALL {
            assert_eq!(SocketType::from_name(ty.to_string().as_bytes()), Some(ty));
        }
        assert_eq!(SocketType::from_name(b"XPUB"), None);
        assert_eq!(SocketType::from_name(b"dealer"), None);
    }

    #[test]
    fn compatibility_is_symmetric() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.is_compatible(b), b.is_compatible(a), "{a} / {b}");
            }
        }
    }

    #[test]
    fn peers_per_type() {
        let peers = |ty: SocketType| -> Vec<SocketType> {
            ALL.into_iter().filter(|p| ty.is_compatible(*p)).collect()
        };
        assert_eq!(peers(Pair), [Pair]);
        assert_eq!(peers(Sub), [Pub]);
        assert_eq!(peers(Req), [Rep, Router]);
        assert_eq!(peers(Rep), [Req, Dealer]);
        assert_eq!(peers(Dealer), [Rep, Dealer, Router]);
        assert_eq!(peers(Router), [Req, Dealer, Router]);
        assert_eq!(peers(Push), [Pull]);
    }
}
