use ingestor::config::{Config as IngestorConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

const DEFAULT_STATSD_PORT: u16 = 8125;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
}

fn default_statsd_port() -> u16 {
    DEFAULT_STATSD_PORT
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `ingestor=debug,info`
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl LoggingConfig {
    /// The level as an `EnvFilter` directive. Python-style names that
    /// `EnvFilter` would read as target names are mapped to their levels.
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim().to_lowercase();
        match level.as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            _ => level,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub ingestor: IngestorConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Reads the file if one is given, then applies environment overrides.
    pub fn load<F>(path: Option<&Path>, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(var)?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| var(name).filter(|value| !value.is_empty());

        if let Some(level) = lookup("LOG_LEVEL") {
            self.common.logging.level = level;
        }
        if let Some(dsn) = lookup("SENTRY_DSN") {
            self.common.logging.sentry_dsn = Some(dsn);
        }

        let statsd_port = match lookup("STATSD_PORT") {
            Some(port) => Some(port.parse().map_err(|_| ValidationError::InvalidEnv {
                name: "STATSD_PORT",
                value: port,
            })?),
            None => None,
        };
        if let Some(statsd_host) = lookup("STATSD_HOST") {
            self.common.metrics = Some(MetricsConfig {
                statsd_host,
                statsd_port: DEFAULT_STATSD_PORT,
            });
        }
        if let (Some(metrics), Some(port)) = (self.common.metrics.as_mut(), statsd_port) {
            metrics.statsd_port = port;
        }

        self.ingestor.apply_env(&var)?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid environment: {0}")]
    EnvError(#[from] ValidationError),
}
