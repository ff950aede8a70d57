//! Endpoint parsing and TCP address resolution.
//!
//! Supported forms:
//! - `tcp://host:port`, `tcp://[v6]:port`
//! - `tcp://*:port` (all interfaces), `tcp://host:*` (ephemeral port)
//! - `inproc://name`

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport. `port == None` stands for `*`.
    Tcp { host: String, port: Option<u16> },
    /// In-process transport: `inproc://name`
    Inproc(String),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use tappet_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(endpoint.is_tcp());
    ///
    /// let endpoint = Endpoint::parse("tcp://*:*").unwrap();
    /// assert_eq!(endpoint.to_string(), "tcp://*:*");
    ///
    /// let endpoint = Endpoint::parse("inproc://my-endpoint").unwrap();
    /// assert!(endpoint.is_inproc());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] for unknown schemes and malformed addresses.
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    #[must_use]
    pub const fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    #[must_use]
    pub const fn is_inproc(&self) -> bool {
        matches!(self, Self::Inproc(_))
    }

    /// Resolve a TCP endpoint to IPv4-preferring socket addresses.
    ///
    /// Same as [`resolve_with(true)`](Self::resolve_with).
    ///
    /// # Errors
    ///
    /// As [`resolve_with`](Self::resolve_with).
    pub fn resolve(&self) -> Result<Vec<SocketAddr>, EndpointError> {
        self.resolve_with(true)
    }

    /// Resolve a TCP endpoint to socket addresses, IPv4 first.
    ///
    /// A `*` port maps to 0 (let the OS pick). With `ipv4_only` a `*` host
    /// is `0.0.0.0` and name lookups drop their IPv6 results when an IPv4
    /// one exists; a literal IPv6 address is still honoured. Otherwise a
    /// `*` host is the dual-stack `[::]`, followed by `0.0.0.0` for hosts
    /// without IPv6.
    ///
    /// # Errors
    ///
    /// `NotTcp` for inproc endpoints, `Unresolvable` when name lookup fails
    /// or yields nothing.
    pub fn resolve_with(&self, ipv4_only: bool) -> Result<Vec<SocketAddr>, EndpointError> {
        let Self::Tcp { host, port } = self else {
            return Err(EndpointError::NotTcp(self.to_string()));
        };
        let port = port.unwrap_or(0);
        if host == "*" {
            let any_v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            if ipv4_only {
                return Ok(vec![any_v4]);
            }
            return Ok(vec![SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)), any_v4]);
        }

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let mut addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| EndpointError::Unresolvable(format!("{host}: {e}")))?
            .collect();
        if ipv4_only && addrs.iter().any(SocketAddr::is_ipv4) {
            addrs.retain(SocketAddr::is_ipv4);
        }
        if addrs.is_empty() {
            return Err(EndpointError::Unresolvable(host.to_string()));
        }
        addrs.sort_by_key(SocketAddr::is_ipv6);
        Ok(addrs)
    }

    /// Endpoint naming a concrete, bound address.
    #[must_use]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::Tcp {
            host: match addr {
                SocketAddr::V4(v4) => v4.ip().to_string(),
                SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
            },
            port: Some(addr.port()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EndpointError::InvalidTcpAddress(addr.to_string()))?;
            if host.is_empty() {
                return Err(EndpointError::InvalidTcpAddress(addr.to_string()));
            }
            let port = match port {
                "*" | "0" => None,
                p => Some(
                    p.parse::<u16>()
                        .map_err(|_| EndpointError::InvalidTcpAddress(addr.to_string()))?,
                ),
            };
            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                Err(EndpointError::InvalidInprocName(
                    "inproc name cannot be empty".to_string(),
                ))
            } else {
                Ok(Self::Inproc(name.to_string()))
            }
        } else if let Some((scheme, _)) = s.split_once("://") {
            match scheme {
                "ipc" | "pgm" | "epgm" | "tipc" | "vmci" => {
                    Err(EndpointError::UnsupportedTransport(scheme.to_string()))
                }
                _ => Err(EndpointError::InvalidScheme(s.to_string())),
            }
        } else {
            Err(EndpointError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp {
                host,
                port: Some(port),
            } => write!(f, "tcp://{host}:{port}"),
            Self::Tcp { host, port: None } => write!(f, "tcp://{host}:*"),
            Self::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Errors that can occur when parsing or using endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid scheme in endpoint: {0} (expected tcp:// or inproc://)")]
    InvalidScheme(String),

    #[error("Transport not supported: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("Invalid inproc name: {0}")]
    InvalidInprocName(String),

    #[error("Cannot resolve: {0}")]
    Unresolvable(String),

    #[error("Not a TCP endpoint: {0}")]
    NotTcp(String),
}

impl From<EndpointError> for crate::error::TappetError {
    fn from(e: EndpointError) -> Self {
        match e {
            EndpointError::UnsupportedTransport(_) => Self::NotSupported("transport"),
            other => Self::InvalidEndpoint(other.to_string()),
        }
    }
}
