//! UDP socket setup
//!
//! Sockets are created through `socket2` so buffer sizes can be tuned before
//! binding, then handed to tokio.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::config::SocketConfig;
use crate::error::NetworkError;

/// Create a non-blocking UDP socket bound to `addr`.
///
/// Must be called from within a tokio runtime. IPv6 sockets accept IPv4
/// traffic as well where the platform allows it.
pub fn create_socket(addr: SocketAddr, config: &SocketConfig) -> Result<UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;

    if addr.is_ipv6() {
        if let Err(e) = socket.set_only_v6(false) {
            tracing::debug!("Dual-stack not available on {}: {}", addr, e);
        }
    }

    // Undersized kernel buffers drop bursts of frames; failure is not fatal
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Failed to set receive buffer to {} bytes: {}", config.recv_buffer_size, e);
    }
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        tracing::warn!("Failed to set send buffer to {} bytes: {}", config.send_buffer_size, e);
    }

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}
