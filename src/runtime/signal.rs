//! SIGINT/SIGTERM handling.
//!
//! The event loops are plain threads, so signals are received on a
//! dedicated watcher thread that runs a current-thread tokio runtime and
//! triggers the [`Shutdown`] handle when either signal arrives.

use super::Shutdown;
use std::io;
use std::thread;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Route SIGINT and SIGTERM to `shutdown`.
///
/// Handlers are registered before this returns, so a signal delivered
/// afterwards is never missed.
pub fn install(shutdown: Shutdown) -> io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let (mut interrupt, mut terminate) = {
        let _guard = rt.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            rt.block_on(async {
                let name = tokio::select! {
                    _ = interrupt.recv() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                };
                info!(signal = name, "Received shutdown signal");
                shutdown.trigger();
            })
        })?;

    Ok(())
}
