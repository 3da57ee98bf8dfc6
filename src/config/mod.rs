//! Configuration management.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::multipath::{BatchConfig, SchedulerConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-packet scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Batch scheduler configuration.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.dump_experiences && scheduler.dump_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "Experience dump enabled but no dump path".into(),
            ));
        }

        if scheduler.allowed_congestion_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "Allowed congestion {}% exceeds 100%",
                scheduler.allowed_congestion_percent
            )));
        }

        let batch = &self.batch;
        if !batch.budget.is_finite() || batch.budget < 0.0 {
            return Err(Error::InvalidConfig(format!("Invalid budget {}", batch.budget)));
        }

        if let Some(c) = batch.path_costs.iter().find(|c| !c.cost.is_finite() || c.cost < 0.0) {
            return Err(Error::InvalidConfig(format!(
                "Invalid cost {} for path {}",
                c.cost, c.path
            )));
        }

        if batch.min_generated_deadline > batch.max_generated_deadline {
            return Err(Error::InvalidConfig(
                "Minimum generated deadline exceeds maximum".into(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::InvalidConfig(format!(
                "Unknown log format {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
