//! Process-wide shutdown handle.
//!
//! Each event loop registers a `mio::Waker` with the handle. Triggering the
//! handle sets a flag and wakes every registered loop, which then stops at
//! the top of its next iteration. Connections still open are dropped, not
//! drained.

use mio::{Registry, Token, Waker};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cloneable cancellation handle shared by the event loops and whoever may
/// stop them (signal watcher, tests).
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every registered event loop.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);

        let wakers = self.inner.wakers.lock().unwrap_or_else(|e| e.into_inner());
        for waker in wakers.iter() {
            // A loop that already exited has nothing left to wake.
            let _ = waker.wake();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Create a waker on `registry` that fires `token` when shutdown is
    /// triggered. Registering after the trigger wakes immediately.
    pub(crate) fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let waker = Waker::new(registry, token)?;

        let mut wakers = self.inner.wakers.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_triggered() {
            waker.wake()?;
        }
        wakers.push(waker);
        Ok(())
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
