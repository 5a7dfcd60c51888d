//! Configuration manager for the pizza service.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_NAME: &str = "pizza-metrics";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const API_KEY_ENV: &str = "METRICS_API_KEY";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that may occur during the configuration loading process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid collector URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to metrics push. Disabled when missing.
    #[serde(skip_serializing)]
    pub metrics: Option<Metrics>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            metrics: None,
        }
    }
}

/// Collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Label attached to every data point.
    pub source: String,
    /// OTLP/HTTP metrics endpoint.
    pub url: String,
    /// Bearer token. Falls back to `METRICS_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Export period.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Per-push HTTP timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            source: DEFAULT_NAME.to_owned(),
            url: String::default(),
            api_key: String::default(),
            interval_ms: DEFAULT_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Metrics {
    /// Export period. `0` means default.
    pub fn interval(&self) -> Duration {
        match self.interval_ms {
            0 => Duration::from_millis(DEFAULT_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Collector timeout. `0` means default.
    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            0 => Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    fn api_key_or(mut self, fallback: Option<String>) -> Self {
        if self.api_key.is_empty() {
            if let Some(key) = fallback {
                self.api_key = key;
            } else {
                tracing::warn!("no collector API key, pushes will be unauthenticated");
            }
        }
        self
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Instance version, always the crate version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, Error> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let config: Configuration = match serde_yaml::from_reader(file) {
                    Ok(config) => config,
                    Err(err) => {
                        return Ok(Arc::new(self.error(err)));
                    },
                };

                Ok(Arc::new(
                    self.finish(config, std::env::var(API_KEY_ENV).ok())?,
                ))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    fn finish(
        &self,
        mut config: Configuration,
        api_key: Option<String>,
    ) -> Result<Self, Error> {
        // set app version.
        config.version = VERSION.to_owned();
        config.path = self.path.clone();

        config.metrics = config
            .metrics
            .map(|mut metrics| {
                metrics.url = self.normalize_url(&metrics.url)?;
                Ok::<_, Error>(metrics.api_key_or(api_key))
            })
            .transpose()?;

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "cannot read `config.yaml`, using defaults");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}
