//! TCP echo load harness.
//!
//! Opens `concurrency` connections to the target. Each worker repeatedly
//! writes a `msg_size`-byte payload (`x` bytes ending in `\n`) and reads
//! back exactly `msg_size` bytes, counting round trips until the test
//! duration elapses. A worker that fails to connect, times out or sees the
//! connection close stops early; its count so far still goes into the
//! report.
//!
//! A run covers one message size; the `bench` command runs once per
//! configured size and prints one report line for each.

use crate::config::BenchConfig;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Why a worker stopped before the deadline.
#[derive(Debug)]
pub enum WorkerError {
    Connect(io::Error),
    Io(io::Error),
    Timeout,
    Closed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Connect(e) => write!(f, "connect failed: {e}"),
            WorkerError::Io(e) => write!(f, "I/O error: {e}"),
            WorkerError::Timeout => write!(f, "operation timed out"),
            WorkerError::Closed => write!(f, "connection closed by peer"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Result of one worker.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub successes: u64,
    pub error: Option<WorkerError>,
}

/// Aggregated result of a load run.
#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub concurrency: usize,
    pub msg_size: usize,
    pub successes: u64,
    pub failed_workers: usize,
    pub duration: Duration,
    pub elapsed: Duration,
}

impl Report {
    /// Successful round trips per second of configured duration, to two decimals.
    pub fn qps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.successes as f64 / secs * 100.0).round() / 100.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with concurrency {} and message size {:.1}KB have qps {} --- cost {:.2}s",
            self.title,
            self.concurrency,
            self.msg_size as f64 / 1024.0,
            self.qps(),
            self.elapsed.as_secs_f64()
        )?;
        if self.failed_workers > 0 {
            write!(f, " ({} workers failed)", self.failed_workers)?;
        }
        Ok(())
    }
}

/// Request payload: `msg_size - 1` bytes of `x` and a newline.
pub fn payload(msg_size: usize) -> Bytes {
    let mut msg = vec![b'x'; msg_size];
    if let Some(last) = msg.last_mut() {
        *last = b'\n';
    }
    Bytes::from(msg)
}

/// Run the load test described by `config` with `msg_size`-byte messages.
pub async fn run(config: &BenchConfig, msg_size: usize) -> Report {
    let start = Instant::now();
    let msg = payload(msg_size);

    let handles: Vec<_> = (0..config.concurrency)
        .map(|worker| {
            let target = config.target.clone();
            let msg = msg.clone();
            let duration = config.duration;
            let op_timeout = config.timeout;
            tokio::spawn(async move {
                let outcome = run_worker(&target, msg, duration, op_timeout).await;
                if let Some(ref e) = outcome.error {
                    warn!(worker, successes = outcome.successes, error = %e, "Worker stopped early");
                } else {
                    debug!(worker, successes = outcome.successes, "Worker finished");
                }
                outcome
            })
        })
        .collect();

    let mut successes = 0;
    let mut failed_workers = 0;
    for handle in handles {
        match handle.await {
            Ok(outcome) => {
                successes += outcome.successes;
                if outcome.error.is_some() {
                    failed_workers += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "Worker task panicked");
                failed_workers += 1;
            }
        }
    }

    Report {
        title: config.title.clone(),
        concurrency: config.concurrency,
        msg_size,
        successes,
        failed_workers,
        duration: config.duration,
        elapsed: start.elapsed(),
    }
}

/// One connection's send/receive loop.
pub async fn run_worker(
    target: &str,
    msg: Bytes,
    duration: Duration,
    op_timeout: Duration,
) -> WorkerOutcome {
    let mut successes = 0;
    let error = match worker_loop(target, &msg, duration, op_timeout, &mut successes).await {
        Ok(()) => None,
        Err(e) => Some(e),
    };
    WorkerOutcome { successes, error }
}

async fn worker_loop(
    target: &str,
    msg: &[u8],
    duration: Duration,
    op_timeout: Duration,
    successes: &mut u64,
) -> Result<(), WorkerError> {
    let mut stream = timeout(op_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| WorkerError::Timeout)?
        .map_err(WorkerError::Connect)?;
    let _ = stream.set_nodelay(true);

    let mut buf = vec![0u8; msg.len()];
    let start = Instant::now();

    while start.elapsed() < duration {
        timeout(op_timeout, stream.write_all(msg))
            .await
            .map_err(|_| WorkerError::Timeout)?
            .map_err(WorkerError::Io)?;

        let mut received = 0;
        while received < msg.len() {
            let n = timeout(op_timeout, stream.read(&mut buf[..msg.len() - received]))
                .await
                .map_err(|_| WorkerError::Timeout)?
                .map_err(WorkerError::Io)?;
            if n == 0 {
                return Err(WorkerError::Closed);
            }
            received += n;
        }
        *successes += 1;
    }

    let _ = stream.shutdown().await;
    Ok(())
}
