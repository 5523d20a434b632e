//! Configuration module for xserve.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::http::handler::DEFAULT_PAYLOAD_SIZE;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "xserve")]
#[command(author = "xserve authors")]
#[command(version = "0.1.0")]
#[command(about = "Event-driven HTTP/1.1 payload server and TCP load harness", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(ServeArgs),
    /// Run the TCP echo load harness
    Bench(BenchArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind to (e.g., 127.0.0.1:9007)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of event loop threads
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum open connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Body size used when the request path names none
    #[arg(long)]
    pub default_payload_size: Option<usize>,

    /// Close connections that ask for a larger body (unbounded if unset)
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Leave Nagle's algorithm enabled on accepted sockets
    #[arg(long)]
    pub no_nodelay: bool,
}

#[derive(Args, Debug, Default)]
pub struct BenchArgs {
    /// Target address (e.g., 127.0.0.1:9007)
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// Number of parallel connections
    #[arg(short = 'n', long)]
    pub concurrency: Option<usize>,

    /// Test duration in seconds
    #[arg(short = 'd', long)]
    pub duration: Option<u64>,

    /// Per-operation timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Message sizes in bytes, including the trailing newline; one run per size
    #[arg(short = 's', long, value_delimiter = ',')]
    pub msg_size: Vec<usize>,

    /// Label leading each report line (defaults to the target address)
    #[arg(long)]
    pub title: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub bench: BenchFileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of event loop threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum open connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Size of each worker's read buffer
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Readiness events fetched per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Disable Nagle's algorithm on accepted sockets
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: default_workers(),
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            events_capacity: default_events_capacity(),
            nodelay: true,
        }
    }
}

/// HTTP handler configuration
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    /// Body size for paths that do not name one
    #[serde(default = "default_payload_size")]
    pub default_payload_size: usize,
    /// Largest body size a path may select; unbounded if unset
    #[serde(default)]
    pub max_payload_size: Option<usize>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_payload_size: default_payload_size(),
            max_payload_size: None,
        }
    }
}

/// Load harness configuration
#[derive(Debug, Deserialize)]
pub struct BenchFileConfig {
    #[serde(default = "default_listen")]
    pub target: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Seconds
    #[serde(default = "default_duration")]
    pub duration: u64,
    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// One run per size, in order
    #[serde(default = "default_msg_sizes")]
    pub msg_sizes: Vec<usize>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Default for BenchFileConfig {
    fn default() -> Self {
        Self {
            target: default_listen(),
            concurrency: default_concurrency(),
            duration: default_duration(),
            timeout: default_timeout(),
            msg_sizes: default_msg_sizes(),
            title: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9007".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_buffer_size() -> usize {
    16 * 1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_payload_size() -> usize {
    DEFAULT_PAYLOAD_SIZE
}

fn default_concurrency() -> usize {
    10
}

fn default_duration() -> u64 {
    10
}

fn default_timeout() -> u64 {
    2000
}

fn default_msg_sizes() -> Vec<usize> {
    vec![1024]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: usize,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub events_capacity: usize,
    pub nodelay: bool,
    pub default_payload_size: usize,
    pub max_payload_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let http = HttpConfig::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9007)),
            workers: server.workers,
            max_connections: server.max_connections,
            read_buffer_size: server.read_buffer_size,
            events_capacity: server.events_capacity,
            nodelay: server.nodelay,
            default_payload_size: http.default_payload_size,
            max_payload_size: http.max_payload_size,
        }
    }
}

/// Final resolved load harness configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub title: String,
    pub target: String,
    pub concurrency: usize,
    pub duration: Duration,
    pub timeout: Duration,
    pub msg_sizes: Vec<usize>,
}

/// What the process was asked to do
#[derive(Debug, Clone)]
pub enum Mode {
    Serve(Config),
    Bench(BenchConfig),
}

/// Fully resolved invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: Mode,
    pub log_level: String,
}

impl Invocation {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge parsed CLI args over a parsed TOML file.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let log_level = cli.log_level.unwrap_or(toml_config.logging.level);

        let mode = match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
            Command::Serve(args) => Mode::Serve(resolve_serve(args, toml_config.server, toml_config.http)?),
            Command::Bench(args) => Mode::Bench(resolve_bench(args, toml_config.bench)?),
        };

        Ok(Invocation { mode, log_level })
    }
}

fn resolve_serve(
    args: ServeArgs,
    server: ServerConfig,
    http: HttpConfig,
) -> Result<Config, ConfigError> {
    let listen = args.listen.unwrap_or(server.listen);
    let listen = listen
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::InvalidAddress(listen))?;

    let config = Config {
        listen,
        workers: args.workers.unwrap_or(server.workers),
        max_connections: args.max_connections.unwrap_or(server.max_connections),
        read_buffer_size: server.read_buffer_size,
        events_capacity: server.events_capacity,
        nodelay: server.nodelay && !args.no_nodelay,
        default_payload_size: args
            .default_payload_size
            .unwrap_or(http.default_payload_size),
        max_payload_size: args.max_payload_size.or(http.max_payload_size),
    };

    if config.workers == 0 {
        return Err(ConfigError::Invalid("workers must be at least 1".into()));
    }
    if config.read_buffer_size == 0 || config.events_capacity == 0 {
        return Err(ConfigError::Invalid(
            "read_buffer_size and events_capacity must be non-zero".into(),
        ));
    }
    Ok(config)
}

fn resolve_bench(args: BenchArgs, bench: BenchFileConfig) -> Result<BenchConfig, ConfigError> {
    let target = args.target.unwrap_or(bench.target);
    let msg_sizes = if args.msg_size.is_empty() {
        bench.msg_sizes
    } else {
        args.msg_size
    };
    let config = BenchConfig {
        title: args.title.or(bench.title).unwrap_or_else(|| target.clone()),
        target,
        concurrency: args.concurrency.unwrap_or(bench.concurrency),
        duration: Duration::from_secs(args.duration.unwrap_or(bench.duration)),
        timeout: Duration::from_millis(args.timeout.unwrap_or(bench.timeout)),
        msg_sizes,
    };

    if config.concurrency == 0 {
        return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
    }
    if config.msg_sizes.is_empty() || config.msg_sizes.contains(&0) {
        return Err(ConfigError::Invalid(
            "msg_sizes must be non-empty and each at least 1".into(),
        ));
    }
    if config.duration.is_zero() || config.timeout.is_zero() {
        return Err(ConfigError::Invalid(
            "duration and timeout must be non-zero".into(),
        ));
    }
    Ok(config)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("xserve").chain(args.iter().copied())).unwrap()
    }

    fn serve_config(inv: Invocation) -> Config {
        match inv.mode {
            Mode::Serve(config) => config,
            other => panic!("expected serve mode, got {other:?}"),
        }
    }

    fn bench_config(inv: Invocation) -> BenchConfig {
        match inv.mode {
            Mode::Bench(config) => config,
            other => panic!("expected bench mode, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:9007");
        assert_eq!(config.server.workers, 1);
        assert!(config.server.nodelay);
        assert_eq!(config.http.default_payload_size, 1024);
        assert_eq!(config.bench.concurrency, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_no_subcommand_serves_with_defaults() {
        let inv = Invocation::resolve(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(inv.log_level, "info");

        let config = serve_config(inv);
        assert_eq!(config.listen, "127.0.0.1:9007".parse().unwrap());
        assert_eq!(config.workers, 1);
        assert_eq!(config.default_payload_size, 1024);
        assert_eq!(config.max_payload_size, None);
        assert!(config.nodelay);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:8080"
            workers = 4
            nodelay = false

            [http]
            default_payload_size = 512
            max_payload_size = 4096

            [bench]
            target = "10.0.0.1:9000"
            concurrency = 32
            msg_sizes = [1024, 10240]
            title = "xserve echo"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.max_connections, 10_000);
        assert!(!config.server.nodelay);
        assert_eq!(config.http.default_payload_size, 512);
        assert_eq!(config.http.max_payload_size, Some(4096));
        assert_eq!(config.bench.target, "10.0.0.1:9000");
        assert_eq!(config.bench.concurrency, 32);
        assert_eq!(config.bench.msg_sizes, vec![1024, 10240]);
        assert_eq!(config.bench.title.as_deref(), Some("xserve echo"));
        assert_eq!(config.bench.duration, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:8080"
            workers = 4

            [http]
            max_payload_size = 4096

            [logging]
            level = "debug"
        "#,
        )
        .unwrap();

        let inv = Invocation::resolve(
            cli(&[
                "--log-level",
                "warn",
                "serve",
                "-l",
                "127.0.0.1:0",
                "--no-nodelay",
                "--max-payload-size",
                "65536",
            ]),
            file,
        )
        .unwrap();
        assert_eq!(inv.log_level, "warn");

        let config = serve_config(inv);
        assert_eq!(config.listen.port(), 0);
        assert_eq!(config.workers, 4);
        assert!(!config.nodelay);
        assert_eq!(config.max_payload_size, Some(65536));
    }

    #[test]
    fn test_bench_args() {
        let inv = Invocation::resolve(
            cli(&["bench", "-t", "127.0.0.1:9005", "-n", "3", "-d", "2", "--timeout", "500", "-s", "64"]),
            TomlConfig::default(),
        )
        .unwrap();

        let config = bench_config(inv);
        assert_eq!(config.target, "127.0.0.1:9005");
        assert_eq!(config.title, "127.0.0.1:9005");
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.duration, Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.msg_sizes, vec![64]);
    }

    #[test]
    fn test_bench_size_matrix_and_title() {
        let inv = Invocation::resolve(
            cli(&["bench", "-s", "1024,10240", "-s", "102400", "--title", "mio reactor"]),
            TomlConfig::default(),
        )
        .unwrap();

        let config = bench_config(inv);
        assert_eq!(config.msg_sizes, vec![1024, 10240, 102400]);
        assert_eq!(config.title, "mio reactor");

        let config = bench_config(Invocation::resolve(cli(&["bench"]), TomlConfig::default()).unwrap());
        assert_eq!(config.msg_sizes, vec![1024]);
        assert_eq!(config.title, "127.0.0.1:9007");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Invocation::resolve(cli(&["serve", "-l", "nonsense"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(ref a) if a == "nonsense"));

        let err = Invocation::resolve(cli(&["serve", "-w", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Invocation::resolve(cli(&["bench", "-s", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_file_errors() {
        let path = std::env::temp_dir().join(format!("xserve-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[server]\nworkers = \"many\"\n").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Result<TomlConfig, _> = toml::from_str(&contents);
        let err = ConfigError::TomlParse(path.clone(), parsed.unwrap_err());
        assert!(err.to_string().starts_with("Failed to parse config file"));

        std::fs::remove_file(&path).unwrap();
    }
}
