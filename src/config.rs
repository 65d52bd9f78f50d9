//! Server configuration
//!
//! Parsed by hand from command-line arguments:
//!
//! ```text
//! -h, --host <HOST>                 Host to bind to (default: 127.0.0.1)
//! -p, --port <PORT>                 Port to listen on (default: 6380)
//!     --aof <PATH>                  Append-only log file (default: appendonly.aof)
//!     --no-aof                      Run without persistence
//!     --cleanup-interval-ms <MS>    Expiry sweep interval (default: 1000)
//!     --log-level <LEVEL>           Log level when RUST_LOG is unset (default: info)
//! -v, --version                     Print version information
//!     --help                        Print help
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Default log file name
pub const DEFAULT_AOF_PATH: &str = "appendonly.aof";

/// Default expiry sweep interval in milliseconds
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 1000;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Append-only log location, `None` disables persistence
    pub aof_path: Option<PathBuf>,
    /// How often the sweeper removes expired keys
    pub cleanup_interval: Duration,
    /// Fallback log filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            aof_path: Some(PathBuf::from(DEFAULT_AOF_PATH)),
            cleanup_interval: Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS),
            log_level: "info".to_string(),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Start the server
    Run(Config),
    /// Print usage and exit
    Help,
    /// Print the version and exit
    Version,
}

/// Errors from parsing command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("invalid cleanup interval: {0} (expected a positive number of milliseconds)")]
    InvalidInterval(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

impl Config {
    /// Parses arguments, excluding the program name.
    pub fn from_args<I, S>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = args.next().ok_or(ConfigError::MissingValue("--host"))?;
                }
                "--port" | "-p" => {
                    let value = args.next().ok_or(ConfigError::MissingValue("--port"))?;
                    config.port = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidPort(value))?;
                }
                "--aof" => {
                    let value = args.next().ok_or(ConfigError::MissingValue("--aof"))?;
                    config.aof_path = Some(PathBuf::from(value));
                }
                "--no-aof" => config.aof_path = None,
                "--cleanup-interval-ms" => {
                    let value = args
                        .next()
                        .ok_or(ConfigError::MissingValue("--cleanup-interval-ms"))?;
                    match value.parse::<u64>() {
                        Ok(ms) if ms > 0 => config.cleanup_interval = Duration::from_millis(ms),
                        _ => return Err(ConfigError::InvalidInterval(value)),
                    }
                }
                "--log-level" => {
                    config.log_level = args
                        .next()
                        .ok_or(ConfigError::MissingValue("--log-level"))?;
                }
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Invocation::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
