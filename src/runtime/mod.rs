//! Custom runtime for the HTTP payload server.
//!
//! Readiness-based I/O via mio (epoll on Linux, kqueue on macOS):
//! - `EventLoop`: one single-threaded reactor per worker
//! - `Connection`: per-connection HTTP state machine
//! - `Shutdown`: cancellation handle observed by every loop
//! - `signal`: routes SIGINT/SIGTERM to a `Shutdown`

mod connection;
mod event_loop;
mod listener;
mod shutdown;
pub mod signal;

pub(crate) use event_loop::EventLoop;
pub use shutdown::Shutdown;

use crate::config::Config;
use std::io;
use std::net::SocketAddr;
use std::thread;
use tracing::{error, info};

/// A bound server, ready to run.
pub struct Server {
    config: Config,
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = listener::bind(config.listen)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            config,
            listener,
            local_addr,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` is triggered.
    ///
    /// Worker 0 runs on the calling thread; any further workers each get a
    /// thread with their own event loop over a clone of the listener.
    pub fn run(self, shutdown: Shutdown) -> io::Result<()> {
        let workers = self.config.workers.max(1);

        info!(
            workers,
            addr = %self.local_addr,
            max_connections = self.config.max_connections,
            "Starting mio runtime"
        );

        let mut handles = Vec::with_capacity(workers - 1);
        for worker_id in 1..workers {
            let listener = self.listener.try_clone()?;
            let config = self.config.clone();
            let shutdown = shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    let result = EventLoop::new(worker_id, listener, &config, shutdown.clone())
                        .and_then(|mut event_loop| event_loop.run());
                    if let Err(e) = result {
                        error!(worker = worker_id, error = %e, "Worker failed");
                        shutdown.trigger();
                    }
                })?;
            handles.push(handle);
        }

        let result = EventLoop::new(0, self.listener, &self.config, shutdown.clone())
            .and_then(|mut event_loop| event_loop.run());
        if result.is_err() {
            shutdown.trigger();
        }

        for handle in handles {
            let _ = handle.join();
        }

        result
    }
}
