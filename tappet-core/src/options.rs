//! Socket configuration options
//!
//! Options are read when a pipe or engine is constructed and again on every
//! reconnect, never consulted on the hot path.

use bytes::Bytes;
use std::time::Duration;

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use tappet_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_hwm(100);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Receive timeout (ZMQ_RCVTIMEO)
    ///
    /// - `None`: Block indefinitely (default)
    /// - `Some(Duration::ZERO)`: Non-blocking
    /// - `Some(duration)`: Wait up to duration, then report would-block
    pub recv_timeout: Option<Duration>,

    /// Send timeout (ZMQ_SNDTIMEO), same convention as `recv_timeout`.
    pub send_timeout: Option<Duration>,

    /// Handshake timeout (ZMQ_HANDSHAKE_IVL)
    ///
    /// Maximum time to complete the ZMTP handshake after the TCP connection
    /// is up. `Duration::ZERO` disables the timeout. Default: 30 seconds.
    pub handshake_timeout: Duration,

    /// Linger (ZMQ_LINGER)
    ///
    /// How long a closed socket keeps flushing queued messages to peers.
    /// - `Some(Duration::ZERO)`: Discard pending messages at once (default)
    /// - `Some(duration)`: Flush for up to duration, then discard
    /// - `None`: Flush until done
    pub linger: Option<Duration>,

    /// Reconnect interval (ZMQ_RECONNECT_IVL). Default: 100ms.
    pub reconnect_ivl: Duration,

    /// Maximum reconnect interval (ZMQ_RECONNECT_IVL_MAX)
    ///
    /// - `Duration::ZERO` (default): always wait `reconnect_ivl`
    /// - otherwise: double the delay after each failure, up to this value
    pub reconnect_ivl_max: Duration,

    /// High water mark for receiving (ZMQ_RCVHWM). 0 = unbounded. Default: 1000.
    pub recv_hwm: usize,

    /// High water mark for sending (ZMQ_SNDHWM). 0 = unbounded. Default: 1000.
    pub send_hwm: usize,

    /// Immediate mode (ZMQ_IMMEDIATE)
    ///
    /// - `false` (default): a connecting socket queues messages before the
    ///   peer is reachable
    /// - `true`: the pipe only exists once the handshake completed
    pub immediate: bool,

    /// Maximum frame size (ZMQ_MAXMSGSIZE). `None` = unlimited.
    ///
    /// A peer sending a larger frame is disconnected.
    pub max_msg_size: Option<usize>,

    /// Bytes requested from the kernel per read. Default: 8192.
    pub read_buffer_size: usize,

    /// Encoded bytes batched before a write. Default: 8192.
    pub write_buffer_size: usize,

    /// Socket identity (ZMQ_ROUTING_ID), announced to peers in READY.
    pub routing_id: Option<Bytes>,

    /// ROUTER mandatory mode (ZMQ_ROUTER_MANDATORY)
    ///
    /// - `false` (default): Silently drop messages to unknown peers
    /// - `true`: Fail with host-unreachable
    pub router_mandatory: bool,

    /// ROUTER raw mode (ZMQ_ROUTER_RAW)
    ///
    /// TCP peers are plain byte streams: no greeting, no framing. Every read
    /// is delivered as `[identity, bytes]` and payload frames are written
    /// verbatim. Only meaningful on ROUTER sockets.
    pub router_raw: bool,

    /// Restrict TCP to IPv4 (ZMQ_IPV4ONLY). Default: true.
    ///
    /// When false, `tcp://*` binds a dual-stack IPv6 listener that also
    /// accepts IPv4 peers, and name lookups keep their IPv6 results.
    pub ipv4_only: bool,

    /// TCP_NODELAY on every connection. Default: true.
    pub tcp_nodelay: bool,

    /// SO_KEEPALIVE (ZMQ_TCP_KEEPALIVE). `None` leaves the OS default.
    pub tcp_keepalive: Option<bool>,

    /// Idle time before keepalive probes (ZMQ_TCP_KEEPALIVE_IDLE).
    pub tcp_keepalive_idle: Option<Duration>,

    /// Interval between keepalive probes (ZMQ_TCP_KEEPALIVE_INTVL).
    pub tcp_keepalive_interval: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None,
            send_timeout: None,
            handshake_timeout: Duration::from_secs(30),
            linger: Some(Duration::ZERO),
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::ZERO,
            recv_hwm: 1000,
            send_hwm: 1000,
            immediate: false,
            max_msg_size: None,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            routing_id: None,
            router_mandatory: false,
            router_raw: false,
            ipv4_only: true,
            tcp_nodelay: true,
            tcp_keepalive: None,
            tcp_keepalive_idle: None,
            tcp_keepalive_interval: None,
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive timeout. `Duration::ZERO` makes `recv` non-blocking.
    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set linger.
    #[must_use]
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set reconnection interval.
    #[must_use]
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    #[must_use]
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Set receive high water mark.
    #[must_use]
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }

    /// Set send high water mark.
    #[must_use]
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Enable or disable immediate mode.
    #[must_use]
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Set maximum frame size.
    #[must_use]
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set both read and write buffer sizes.
    #[must_use]
    pub fn with_buffer_sizes(mut self, read_size: usize, write_size: usize) -> Self {
        self.read_buffer_size = read_size;
        self.write_buffer_size = write_size;
        self
    }

    /// Set the identity announced to peers.
    ///
    /// ```
    /// use tappet_core::options::SocketOptions;
    /// use bytes::Bytes;
    ///
    /// let opts = SocketOptions::new().with_routing_id(Bytes::from_static(b"worker-1"));
    /// assert_eq!(opts.routing_id.as_deref(), Some(&b"worker-1"[..]));
    /// ```
    #[must_use]
    pub fn with_routing_id(mut self, id: impl Into<Bytes>) -> Self {
        self.routing_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_router_mandatory(mut self, enabled: bool) -> Self {
        self.router_mandatory = enabled;
        self
    }

    #[must_use]
    pub fn with_router_raw(mut self, enabled: bool) -> Self {
        self.router_raw = enabled;
        self
    }

    #[must_use]
    pub fn with_ipv4_only(mut self, enabled: bool) -> Self {
        self.ipv4_only = enabled;
        self
    }

    #[must_use]
    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Enable TCP keepalive with optional idle time and probe interval.
    #[must_use]
    pub fn with_tcp_keepalive(
        mut self,
        enabled: bool,
        idle: Option<Duration>,
        interval: Option<Duration>,
    ) -> Self {
        self.tcp_keepalive = Some(enabled);
        self.tcp_keepalive_idle = idle;
        self.tcp_keepalive_interval = interval;
        self
    }

    /// Validate an identity before it is announced or assigned.
    ///
    /// Identities must be 1-255 bytes and must not start with a null byte,
    /// which is reserved for identities generated by ROUTER sockets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the violated rule.
    pub fn validate_routing_id(id: &[u8]) -> std::io::Result<()> {
        if id.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "routing ID cannot be empty",
            ));
        }

        if id.len() > 255 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("routing ID cannot exceed 255 bytes (got {})", id.len()),
            ));
        }

        if id[0] == 0x00 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "routing ID cannot start with null byte (reserved for auto-generated IDs)",
            ));
        }

        Ok(())
    }

    /// HWM of an in-process pipe direction: writer's send HWM plus reader's
    /// receive HWM, unbounded if either side is.
    #[must_use]
    pub const fn inproc_hwm(writer: &Self, reader: &Self) -> usize {
        if writer.send_hwm == 0 || reader.recv_hwm == 0 {
            0
        } else {
            writer.send_hwm + reader.recv_hwm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_zmq() {
        let opts = SocketOptions::default();
        assert_eq!(opts.recv_timeout, None);
        assert_eq!(opts.send_timeout, None);
        assert_eq!(opts.handshake_timeout, Duration::from_secs(30));
        assert_eq!(opts.linger, Some(Duration::ZERO));
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(100));
        assert!(opts.reconnect_ivl_max.is_zero());
        assert_eq!((opts.send_hwm, opts.recv_hwm), (1000, 1000));
        assert!(!opts.immediate);
        assert!(!opts.router_raw);
        assert!(opts.ipv4_only);
        assert!(opts.tcp_nodelay);
        assert!(opts.routing_id.is_none());
    }

    #[test]
    fn builders_chain() {
        let opts = SocketOptions::new()
            .with_send_timeout(Duration::ZERO)
            .with_linger(None)
            .with_immediate(true)
            .with_ipv4_only(false)
            .with_max_msg_size(Some(4096))
            .with_buffer_sizes(1024, 2048)
            .with_tcp_keepalive(true, Some(Duration::from_secs(60)), None);

        assert_eq!(opts.send_timeout, Some(Duration::ZERO));
        assert_eq!(opts.linger, None);
        assert!(opts.immediate);
        assert!(!opts.ipv4_only);
        assert_eq!(opts.max_msg_size, Some(4096));
        assert_eq!((opts.read_buffer_size, opts.write_buffer_size), (1024, 2048));
        assert_eq!(opts.tcp_keepalive, Some(true));
        assert_eq!(opts.tcp_keepalive_idle, Some(Duration::from_secs(60)));
        assert_eq!(opts.tcp_keepalive_interval, None);
    }

    #[test]
    fn routing_id_rules() {
        assert!(SocketOptions::validate_routing_id(b"client-1").is_ok());
        assert!(SocketOptions::validate_routing_id(&[b'x'; 255]).is_ok());

        for bad in [&b""[..], &[0u8, 1, 2][..], &[b'x'; 256][..]] {
            let err = SocketOptions::validate_routing_id(bad).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn inproc_hwm_sums_both_sides() {
        let writer = SocketOptions::new().with_send_hwm(10);
        let reader = SocketOptions::new().with_recv_hwm(5);
        assert_eq!(SocketOptions::inproc_hwm(&writer, &reader), 15);

        let unbounded = SocketOptions::new().with_recv_hwm(0);
        assert_eq!(SocketOptions::inproc_hwm(&writer, &unbounded), 0);
    }
}
