//! Mirror configuration, loadable from `npm-mirror.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_SOURCE: &str = "http://registry.npmjs.org/";
pub const DEFAULT_SERVER: &str = "http://localhost/";

/// Configuration for a mirror run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Upstream registry base URL.
    pub source: String,
    /// Local directory the mirror is written to.
    pub root: PathBuf,
    /// Base URL the mirror is served from; tarball links are rewritten to it.
    pub server: String,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Surface an unchanged index and re-schedule every package from the
    /// stored copy. When disabled, an unchanged index ends the run early.
    pub recheck: bool,
    /// Delay between attempts after a transient failure.
    pub retry_delay_ms: u64,
    /// How often the driver checks the pool for quiescence.
    pub poll_interval_ms: u64,
    /// Package-sync tasks scheduled per burst, as a multiple of `workers`.
    pub batch_factor: usize,
    /// Pause between scheduling bursts.
    pub batch_pause_ms: u64,
    pub request_timeout_secs: u64,
    pub max_redirects: usize,
    /// How long shutdown waits for workers before detaching them.
    pub shutdown_grace_ms: u64,
    pub user_agent: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            root: default_root(),
            server: DEFAULT_SERVER.to_string(),
            workers: 10,
            recheck: true,
            retry_delay_ms: 10_000,
            poll_interval_ms: 200,
            batch_factor: 10,
            batch_pause_ms: 500,
            request_timeout_secs: 60,
            max_redirects: 10,
            shutdown_grace_ms: 200,
            user_agent: format!("npm-mirror/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn default_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("npm-mirror"))
        .unwrap_or_else(|| PathBuf::from("./npm-mirror"))
}

impl MirrorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a TOML file.
    ///
    /// Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or is not valid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|error| Error::Toml {
            error,
            context: path.display().to_string(),
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_recheck(mut self, recheck: bool) -> Self {
        self.recheck = recheck;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_batch_factor(mut self, factor: usize) -> Self {
        self.batch_factor = factor;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Number of package-sync tasks scheduled before pausing.
    pub fn batch_size(&self) -> usize {
        (self.workers * self.batch_factor).max(1)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        for (field, url) in [("source", &self.source), ("server", &self.server)] {
            let parsed = Url::parse(url)
                .map_err(|e| Error::Config(format!("{} is not a valid URL '{}': {}", field, url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
                return Err(Error::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    field, url
                )));
            }
        }
        if self.root.as_os_str().is_empty() {
            return Err(Error::Config("root must not be empty".to_string()));
        }
        Ok(())
    }
}
