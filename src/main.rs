//! xserve: a minimal HTTP/1.1 payload server
//!
//! Serves `GET /<n>` with an `n`-byte body of `X` characters from a
//! readiness-based event loop, for benchmarking the runtime itself.
//!
//! Features:
//! - Incremental request parsing with keep-alive support
//! - Per-size memoized response bodies
//! - Graceful stop on SIGINT/SIGTERM
//! - `bench` subcommand: a TCP echo load harness
//! - Configuration via CLI arguments or TOML file

mod cache;
mod config;
mod loadgen;
mod protocols;
mod runtime;

use config::{BenchConfig, Config, Invocation, Mode};
use runtime::{Server, Shutdown};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let invocation = Invocation::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&invocation.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match invocation.mode {
        Mode::Serve(config) => serve(config),
        Mode::Bench(config) => bench(config),
    }
}

/// Run the HTTP server until SIGINT/SIGTERM.
fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        workers = config.workers,
        max_connections = config.max_connections,
        default_payload_size = config.default_payload_size,
        "Starting xserve"
    );

    let server = Server::bind(config)?;
    let shutdown = Shutdown::new();
    runtime::signal::install(shutdown.clone())?;

    info!("Serving on http://{}/", server.local_addr());
    info!("Press CTRL-C to exit");

    server.run(shutdown)?;

    info!("Server stopped");
    Ok(())
}

/// Run the load harness and print its report.
fn bench(config: BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        addr = %config.target,
        concurrency = config.concurrency,
        duration_secs = config.duration.as_secs_f64(),
        msg_sizes = ?config.msg_sizes,
        "Starting load test"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    for &msg_size in &config.msg_sizes {
        let report = rt.block_on(loadgen::run(&config, msg_size));
        println!("{report}");
    }
    Ok(())
}
