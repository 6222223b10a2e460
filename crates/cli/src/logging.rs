//! Logging setup for the migration runner

use std::io;

use lambo_migrate::AppConfig;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the command line runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Environment filter (supports complex filters like "lambo_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Logging as configured for the application, with sqlx's statement log kept quiet
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            level: config.log_level.clone(),
            json_format: config.json_logs,
            env_filter: Some(format!("{},sqlx=warn", config.log_level)),
        }
    }

    /// The filter used when `RUST_LOG` is not set
    pub fn filter_directives(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Initialize logging for the process
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).with_target(false))
            .try_init()?;
    }

    tracing::debug!(
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_follows_app_config() {
        let config = AppConfig {
            log_level: "debug".to_string(),
            json_logs: true,
            ..AppConfig::default()
        };

        let logging = LoggingConfig::from_app_config(&config);
        assert!(logging.json_format);
        assert_eq!(logging.filter_directives(), "debug,sqlx=warn");
    }

    #[test]
    fn test_default_filter_is_the_level() {
        assert_eq!(LoggingConfig::default().filter_directives(), "info");
    }
}
