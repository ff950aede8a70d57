//! TCP socket tuning for reactor-owned streams.
//!
//! Options are applied through `socket2::SockRef`, which borrows the
//! descriptor without taking ownership.

use crate::options::SocketOptions;
use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::SocketAddr;

const LISTEN_BACKLOG: i32 = 1024;

/// Bind a non-blocking listener on `addr`.
///
/// An IPv6 listener accepts IPv4 peers as well unless `ipv4_only` is set.
///
/// # Errors
///
/// The OS error from socket creation, bind or listen.
pub fn bind_listener(addr: SocketAddr, ipv4_only: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(ipv4_only)?;
    }
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Apply `TCP_NODELAY` and keepalive settings from `options`.
///
/// # Errors
///
/// Returns an error if the OS rejects a socket option.
pub fn configure_stream(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    let sock = SockRef::from(stream);
    if options.tcp_nodelay {
        sock.set_nodelay(true)?;
    }

    match options.tcp_keepalive {
        Some(true) => {
            let mut keepalive = TcpKeepalive::new();
            if let Some(idle) = options.tcp_keepalive_idle {
                keepalive = keepalive.with_time(idle);
            }
            #[cfg(any(
                target_os = "linux",
                target_os = "android",
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "windows"
            ))]
            if let Some(interval) = options.tcp_keepalive_interval {
                keepalive = keepalive.with_interval(interval);
            }
            sock.set_tcp_keepalive(&keepalive)?;
        }
        Some(false) => sock.set_keepalive(false)?,
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn nodelay_and_keepalive_applied() {
        let (stream, _client) = connected_pair();
        let options = SocketOptions::new().with_tcp_keepalive(
            true,
            Some(Duration::from_secs(30)),
            Some(Duration::from_secs(5)),
        );
        configure_stream(&stream, &options).unwrap();

        let sock = SockRef::from(&stream);
        assert!(sock.nodelay().unwrap());
        assert!(sock.keepalive().unwrap());
    }

    #[test]
    fn listener_is_non_blocking() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), true).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert_eq!(
            listener.accept().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn dual_stack_listener_accepts_ipv4() {
        // Hosts without IPv6 cannot run this
        let Ok(listener) = bind_listener("[::]:0".parse().unwrap(), false) else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());
        assert!(!SockRef::from(&listener).only_v6().unwrap());
    }

    #[test]
    fn keepalive_left_alone_by_default() {
        let (stream, _client) = connected_pair();
        configure_stream(&stream, &SocketOptions::new().with_tcp_nodelay(false)).unwrap();
        assert!(!SockRef::from(&stream).keepalive().unwrap());
    }
}
