// SPDX-License-Identifier: MIT OR Apache-2.0

//! Socket construction for the session and discovery channels
//!
//! Sockets are built with `socket2` so the reuse and broadcast options can be
//! set before binding, then handed to tokio in non-blocking mode.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, UdpSocket};

/// Backlog of pending session connections
const LISTEN_BACKLOG: i32 = 128;

/// Check if a specific TCP port is free on loopback
pub fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Check if a UDP port is free on loopback
pub fn is_udp_port_available(port: u16) -> bool {
    std::net::UdpSocket::bind(("127.0.0.1", port)).is_ok()
}

/// Create the host's session listener with SO_REUSEADDR
pub fn create_session_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // Lets a restarted host rebind while old connections sit in TIME_WAIT
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Create the socket a discovery listener receives beacons on.
///
/// SO_REUSEADDR (and SO_REUSEPORT where available) allow several searching
/// processes on one machine to share the discovery port.
pub fn create_discovery_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    {
        if let Err(e) = socket.set_reuse_port(true) {
            tracing::warn!("Failed to set SO_REUSEPORT on discovery socket: {}", e);
        }
    }

    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Create an unbound-port socket able to send beacons to `target`
pub fn create_beacon_socket(target: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.bind(&local.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
