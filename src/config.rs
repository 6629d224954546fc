//! Runtime configuration.
//!
//! Parsed from CLI arguments with environment-variable fallbacks (`DBHUB_*`).

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const CONNECTIONS_FILE: &str = "connections.json";

/// Configuration for the db-hub service host.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-hub",
    about = "Multi-engine database access core - manages MySQL/MongoDB/Elasticsearch connections, schema indexing and confirmation-gated query execution",
    version
)]
pub struct Config {
    /// Directory holding persisted state (saved connections).
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "DBHUB_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Connection ids to bring up at startup. Can be given multiple times
    /// or comma-separated. Failures are logged, not fatal.
    #[arg(
        short = 'c',
        long = "connect",
        value_name = "ID",
        env = "DBHUB_CONNECT",
        value_delimiter = ','
    )]
    pub connect: Vec<String>,

    /// Connect timeout in seconds for engine clients.
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DBHUB_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBHUB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBHUB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connect: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Path of the saved-connections file.
    pub fn connections_path(&self) -> PathBuf {
        self.data_dir.join(CONNECTIONS_FILE)
    }

    /// Get the connect timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
