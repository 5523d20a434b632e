//! Listening socket setup.

use std::io;
use std::net::SocketAddr;
use tracing::debug;

/// Listen backlog for the accept queue.
pub const BACKLOG: i32 = 1024;

/// Create a non-blocking TCP listener bound to `addr`.
pub fn bind(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Disable Nagle's algorithm on an accepted stream. Failure is logged and
/// otherwise ignored.
pub fn set_nodelay(stream: &mio::net::TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
}
