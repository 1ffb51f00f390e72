//! Logging setup built on `tracing-subscriber`.
use crate::config::LoggingConfig;
use crate::core::{DaliteError, Result};
use tracing::Level;

/// Installs a global fmt subscriber at the configured level (default `info`).
///
/// Calling it again after a subscriber is installed is harmless; the first
/// subscriber stays in place.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(config.level.as_deref().unwrap_or("info"))?;
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    Ok(())
}

fn parse_level(level: &str) -> Result<Level> {
    level
        .parse::<Level>()
        .map_err(|_| DaliteError::Config(format!("unknown log level '{}'", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_level("loud"), Err(DaliteError::Config(_))));
    }

    #[test]
    fn test_init_twice() {
        let config = LoggingConfig {
            level: Some("debug".to_string()),
        };
        init(&config).unwrap();
        init(&config).unwrap();
    }
}
