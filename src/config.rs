use crate::core::{DaliteError, Result};
use serde::Deserialize;
use std::fs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default busy timeout applied to every connection unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout used by bulk transfers, for both opening and the transfer itself.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(300);

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database-related configuration.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub default_timeout_secs: Option<u64>,
    pub bulk_timeout_secs: Option<u64>,
    pub foreign_keys: Option<bool>,
    pub journal_mode: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl Config {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DaliteError::Config(e.to_string()))
    }

    /// Builds the connection settings described by the `[database]` section.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::try_from(&self.database)
    }
}

/// SQLite journal modes accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

impl FromStr for JournalMode {
    type Err = DaliteError;

    /// Parses a mode name, ignoring case
    fn from_str(mode: &str) -> Result<Self> {
        match mode.trim().to_uppercase().as_str() {
            "DELETE" => Ok(JournalMode::Delete),
            "TRUNCATE" => Ok(JournalMode::Truncate),
            "PERSIST" => Ok(JournalMode::Persist),
            "MEMORY" => Ok(JournalMode::Memory),
            "WAL" => Ok(JournalMode::Wal),
            "OFF" => Ok(JournalMode::Off),
            _ => Err(DaliteError::Config(format!("unknown journal_mode '{}'", mode))),
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings used to open every connection of a session or data source.
///
/// The target is handed to the driver untouched: a file path, `:memory:`,
/// or a `file:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub target: String,
    pub default_timeout: Duration,
    pub bulk_timeout: Duration,
    pub foreign_keys: bool,
    pub journal_mode: Option<JournalMode>,
}

impl ConnectionConfig {
    /// Creates a configuration for the given database target with defaults.
    pub fn new(target: impl Into<String>) -> Self {
        ConnectionConfig {
            target: target.into(),
            default_timeout: DEFAULT_TIMEOUT,
            bulk_timeout: BULK_TIMEOUT,
            foreign_keys: true,
            journal_mode: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = timeout;
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    /// Pragmas run on every freshly opened connection.
    pub(crate) fn init_sql(&self) -> String {
        let mut sql = format!(
            "PRAGMA foreign_keys = {};",
            if self.foreign_keys { "ON" } else { "OFF" }
        );
        if let Some(mode) = self.journal_mode {
            sql.push_str(&format!(" PRAGMA journal_mode = {};", mode));
        }
        sql
    }
}

impl From<&str> for ConnectionConfig {
    fn from(target: &str) -> Self {
        ConnectionConfig::new(target)
    }
}

impl From<String> for ConnectionConfig {
    fn from(target: String) -> Self {
        ConnectionConfig::new(target)
    }
}

impl From<&Path> for ConnectionConfig {
    fn from(path: &Path) -> Self {
        ConnectionConfig::new(path.to_string_lossy().into_owned())
    }
}

impl TryFrom<&DatabaseConfig> for ConnectionConfig {
    type Error = DaliteError;

    fn try_from(db: &DatabaseConfig) -> Result<Self> {
        if db.path.trim().is_empty() {
            return Err(DaliteError::Config("database.path must not be empty".to_string()));
        }
        let journal_mode = db
            .journal_mode
            .as_deref()
            .map(JournalMode::from_str)
            .transpose()?;

        let mut config = ConnectionConfig::new(db.path.clone());
        if let Some(secs) = db.default_timeout_secs {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = db.bulk_timeout_secs {
            config.bulk_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = db.foreign_keys {
            config.foreign_keys = enabled;
        }
        config.journal_mode = journal_mode;
        Ok(config)
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Config::from_toml_str(&content)
}

/// Location of the per-user configuration file, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dalite").join("config.toml"))
}
