//! mio event loop.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! connection performs non-blocking reads and writes until the socket would
//! block. Uses epoll on Linux, kqueue on macOS.
//!
//! One loop runs per worker thread. A loop owns its `Poll`, its connections
//! and its response cache; nothing on the request path is shared between
//! loops.

use crate::config::Config;
use crate::protocols::http::PayloadHandler;
use crate::runtime::connection::{Connection, Progress};
use crate::runtime::{listener, Shutdown};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Registry slot for one accepted connection.
struct Slot {
    conn: Connection<TcpStream>,
    peer: SocketAddr,
    interest: Interest,
}

/// Single-threaded reactor serving one listening socket.
pub struct EventLoop {
    worker_id: usize,
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Slot>,
    handler: PayloadHandler,
    scratch: Vec<u8>,
    shutdown: Shutdown,
    max_connections: usize,
    events_capacity: usize,
    nodelay: bool,
}

impl EventLoop {
    /// Set up a loop around `listener`, which must be non-blocking.
    pub fn new(
        worker_id: usize,
        listener: std::net::TcpListener,
        config: &Config,
        shutdown: Shutdown,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        shutdown.register(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            worker_id,
            poll,
            listener,
            connections: Slab::with_capacity(config.max_connections.min(4096)),
            handler: PayloadHandler::new(config.default_payload_size, config.max_payload_size),
            scratch: vec![0u8; config.read_buffer_size],
            shutdown,
            max_connections: config.max_connections,
            events_capacity: config.events_capacity,
            nodelay: config.nodelay,
        })
    }

    /// Run until shutdown is triggered.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.events_capacity);

        info!(worker = self.worker_id, "Worker started");

        while !self.shutdown.is_triggered() {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections()?,
                    WAKER_TOKEN => {}
                    Token(conn_id) => self.connection_ready(conn_id),
                }
            }
        }

        let stats = self.handler.cache_stats();
        info!(
            worker = self.worker_id,
            open_connections = self.connections.len(),
            cached_bodies = stats.entries,
            cached_bytes = stats.bytes,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "Worker stopped"
        );
        Ok(())
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.len() >= self.max_connections {
                        warn!(worker = self.worker_id, peer = %peer, "Connection limit reached");
                        continue;
                    }
                    if self.nodelay {
                        listener::set_nodelay(&stream);
                    }

                    let entry = self.connections.vacant_entry();
                    let conn_id = entry.key();
                    let slot = entry.insert(Slot {
                        conn: Connection::new(stream),
                        peer,
                        interest: Interest::READABLE,
                    });

                    if let Err(e) = self.poll.registry().register(
                        slot.conn.stream_mut(),
                        Token(conn_id),
                        Interest::READABLE,
                    ) {
                        warn!(worker = self.worker_id, peer = %peer, error = %e, "Failed to register connection");
                        self.connections.remove(conn_id);
                        continue;
                    }

                    debug!(worker = self.worker_id, conn_id, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // Per-connection failures (e.g. ECONNABORTED) must not stop the loop.
                    error!(worker = self.worker_id, error = %e, "Accept error");
                    return Ok(());
                }
            }
        }
    }

    fn connection_ready(&mut self, conn_id: usize) {
        let Some(slot) = self.connections.get_mut(conn_id) else {
            return;
        };

        let wanted = match slot.conn.drive(&mut self.scratch, &mut self.handler) {
            Ok(Progress::Read) => Interest::READABLE,
            Ok(Progress::Write) => Interest::WRITABLE,
            Ok(Progress::Close) => {
                trace!(conn_id, peer = %slot.peer, "Connection finished");
                self.close_connection(conn_id);
                return;
            }
            Err(e) => {
                debug!(conn_id, peer = %slot.peer, error = %e, "Connection error");
                self.close_connection(conn_id);
                return;
            }
        };

        if wanted != slot.interest {
            if let Err(e) = self
                .poll
                .registry()
                .reregister(slot.conn.stream_mut(), Token(conn_id), wanted)
            {
                debug!(conn_id, error = %e, "Failed to reregister connection");
                self.close_connection(conn_id);
                return;
            }
            trace!(conn_id, state = ?slot.conn.state(), interest = ?wanted, "Interest changed");
            slot.interest = wanted;
        }
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut slot) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(slot.conn.stream_mut());
            debug!(
                conn_id,
                peer = %slot.peer,
                requests = slot.conn.requests_served(),
                "Connection closed"
            );
        }
    }
}
