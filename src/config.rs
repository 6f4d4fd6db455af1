use crate::core::{QueryflowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub connection: ConnectionOptions,
    #[serde(default)]
    pub pool: PoolOptions,
}

/// Connection settings, passed through verbatim to the driver.
///
/// SQLite opens `database` as a file path (or `:memory:`); host, user and
/// password are carried for drivers that need them.
#[derive(Clone, Deserialize, Serialize)]
pub struct ConnectionOptions {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Never written out when the options are serialized
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    /// Allow one query descriptor to carry several `;`-separated statements
    #[serde(default)]
    pub multiple_statements: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("multiple_statements", &self.multiple_statements)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl ConnectionOptions {
    /// Options for `database` with everything else defaulted
    pub fn new(database: impl Into<String>) -> Self {
        ConnectionOptions {
            host: None,
            user: None,
            password: None,
            database: database.into(),
            multiple_statements: false,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Reads options from `QUERYFLOW_HOST`, `QUERYFLOW_USER`,
    /// `QUERYFLOW_PASS`, `QUERYFLOW_DB` and `QUERYFLOW_MULTIPLE_STATEMENTS`.
    /// Only `QUERYFLOW_DB` is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let database = lookup("QUERYFLOW_DB")
            .ok_or_else(|| QueryflowError::Config("QUERYFLOW_DB is not set".to_string()))?;

        let multiple_statements = match lookup("QUERYFLOW_MULTIPLE_STATEMENTS").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(QueryflowError::Config(format!(
                    "QUERYFLOW_MULTIPLE_STATEMENTS must be true or false, got {:?}",
                    other
                )))
            }
        };

        Ok(ConnectionOptions {
            host: lookup("QUERYFLOW_HOST"),
            user: lookup("QUERYFLOW_USER"),
            password: lookup("QUERYFLOW_PASS"),
            multiple_statements,
            ..ConnectionOptions::new(database)
        })
    }
}

/// Pool sizing and acquisition settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolOptions {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// How long `get_connection` waits for a free connection
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_max_size() -> usize {
    10
}

fn default_wait_timeout_ms() -> u64 {
    5000
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_size: default_max_size(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = queryflow::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    if config.connection.database.trim().is_empty() {
        return Err(QueryflowError::Config("connection.database must not be empty".to_string()));
    }
    if config.pool.max_size == 0 {
        return Err(QueryflowError::Config("pool.max_size must be at least 1".to_string()));
    }
    Ok(config)
}

/// Default location of the configuration file:
/// `<config dir>/queryflow/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("queryflow").join("config.toml"))
}
