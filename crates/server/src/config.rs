//! Server configuration.
//!
//! Configuration is resolved in three layers: an optional TOML file, then
//! `TRACEDB__`-prefixed environment variables, then CLI flags.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the OTLP gRPC listener binds to.
    #[serde(default = "default_grpc_listen")]
    pub grpc_listen: SocketAddr,
    /// Address the HTTP listener (OTLP/HTTP plus the JSON API) binds to.
    #[serde(default = "default_http_listen")]
    pub http_listen: SocketAddr,
    /// Disable the HTTP listener entirely.
    #[serde(default)]
    pub disable_http: bool,
    /// Directory holding the trace database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Retention horizon in days; zero or negative selects the store default.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Seconds between retention cleanup passes.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// JSON structured logging.
    Json,
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
}

impl LogFormat {
    /// Whether this format resolves to JSON output for the current stdout.
    pub fn is_json(self) -> bool {
        match self {
            LogFormat::Json => true,
            LogFormat::Text => false,
            LogFormat::Auto => !std::io::stdout().is_terminal(),
        }
    }
}

fn default_grpc_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4317))
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4318))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_retention_days() -> i64 {
    tracedb_store::DEFAULT_RETENTION_DAYS
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grpc_listen: default_grpc_listen(),
            http_listen: default_http_listen(),
            disable_http: false,
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus environment variables.
    ///
    /// When no path is given, `tracedb.toml` in the working directory and
    /// `/etc/tracedb/config.toml` are tried but not required. Environment
    /// variables use the `TRACEDB__` prefix with `__` as the nesting
    /// separator (e.g. `TRACEDB__RETENTION_DAYS=14`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder();

        let builder = if let Some(path) = path {
            builder.add_source(config::File::from(path.to_path_buf()))
        } else {
            builder
                .add_source(config::File::with_name("tracedb").required(false))
                .add_source(config::File::with_name("/etc/tracedb/config").required(false))
        };

        let builder = builder.add_source(
            config::Environment::with_prefix("TRACEDB")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().map_err(|e| ConfigError::Load(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Create a configuration for testing, pointing at a private data
    /// directory and ephemeral ports.
    pub fn for_test(data_dir: PathBuf) -> Self {
        Self {
            grpc_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir,
            ..Self::default()
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to load configuration sources.
    Load(String),
    /// Failed to deserialize the merged configuration.
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "failed to load config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Command-line interface. Flags override file and environment values.
#[derive(Debug, Parser)]
#[command(name = "tracedb-server", version, about = "OTLP trace storage server")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// OTLP gRPC listen address.
    #[arg(long)]
    pub grpc_listen: Option<SocketAddr>,
    /// HTTP listen address (OTLP/HTTP and the JSON API).
    #[arg(long)]
    pub http_listen: Option<SocketAddr>,
    /// Disable the HTTP listener.
    #[arg(long)]
    pub no_http: bool,
    /// Directory holding the trace database file.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Retention horizon in days.
    #[arg(long)]
    pub retention_days: Option<i64>,
    /// Seconds between retention cleanup passes.
    #[arg(long)]
    pub cleanup_interval_secs: Option<u64>,
    /// Log output format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Overlay CLI flags onto a loaded configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(addr) = self.grpc_listen {
            config.grpc_listen = addr;
        }
        if let Some(addr) = self.http_listen {
            config.http_listen = addr;
        }
        if self.no_http {
            config.disable_http = true;
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(days) = self.retention_days {
            config.retention_days = days;
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = secs;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}
