//! Application configuration management.
//!
//! Settings are layered with `figment`, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. A TOML file (the platform config directory, or `--config PATH`)
//! 3. `DRIVEDUPE_` environment variables, with `__` separating sections
//!    (`DRIVEDUPE_HASH__WORKER_COUNT=8`)
//! 4. Command-line flags ([`Config::merge_scan_args`])
//!
//! # Example file
//!
//! ```toml
//! [hash]
//! algorithm = "blake3"
//! worker_count = 8
//! max_retries = 5
//!
//! [retry]
//! initial_backoff_ms = 500
//!
//! [grouping]
//! min_size = 4096
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::ScanArgs;
use crate::duplicates::FileFilter;
use crate::hasher::{HashAlgorithm, RetryPolicy, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_FILE_SIZE};
use crate::progress::{ThrottleConfig, TrackerConfig};
use crate::service::ServiceSettings;

/// Prefix of environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "DRIVEDUPE_";

/// Hashing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashSettings {
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Worker threads (0 uses the available parallelism)
    pub worker_count: usize,
    /// Retries per file for transient failures
    pub max_retries: u32,
    /// Largest file hashed, in bytes (0 disables the limit)
    pub max_file_size: u64,
    /// Read buffer size in bytes
    pub buffer_size: usize,
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            worker_count: 0,
            max_retries: 3,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Backoff between retries of a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Progress notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Minimum change in percentage points between notifications
    pub min_percentage_delta: f64,
    /// Notification cap per second (0 disables the cap)
    pub max_notifications_per_second: u32,
    /// Queued updates per subscriber
    pub subscriber_buffer: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        let throttle = ThrottleConfig::default();
        Self {
            min_percentage_delta: throttle.min_percentage_delta,
            max_notifications_per_second: throttle.max_notifications_per_second,
            subscriber_buffer: TrackerConfig::default().subscriber_buffer,
        }
    }
}

/// Duplicate grouping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSettings {
    /// Ignore files smaller than this many bytes
    pub min_size: u64,
    /// Smallest group reported
    pub min_group_size: usize,
    /// Report only the N most wasteful groups (0 reports all)
    pub max_results: usize,
    /// Allowed mime types (`image/*` style prefixes work)
    pub mime_types: Vec<String>,
    /// Allowed file extensions
    pub extensions: Vec<String>,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            min_size: 0,
            min_group_size: 2,
            max_results: 0,
            mime_types: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hash: HashSettings,
    pub retry: RetrySettings,
    pub tracker: TrackerSettings,
    pub grouping: GroupingSettings,
}

impl Config {
    /// Load the layered configuration.
    ///
    /// `path` replaces the platform config file. Any loading or validation
    /// failure falls back to the defaults.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        match Self::load_internal(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Failed to load config, using defaults: {e:#}");
                Self::default()
            }
        }
    }

    /// Load from an explicit file, failing instead of falling back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid TOML, or holds
    /// invalid values.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        Self::load_internal(Some(path))
    }

    fn load_internal(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path)?
            .extract()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack used by [`Config::load`].
    ///
    /// # Errors
    ///
    /// Returns an error if no config path was given and the platform
    /// config directory cannot be determined.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let file = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        log::trace!("Reading config from {}", file.display());
        Ok(Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Save the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default platform-specific configuration path.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform directories cannot be determined.
    pub fn config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "drivedupe", "drivedupe")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine project directories"))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    /// Reject values no run can work with.
    ///
    /// # Errors
    ///
    /// Names the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.hash.buffer_size == 0 {
            bail!("hash.buffer_size must be greater than 0");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            bail!("retry.multiplier must be at least 1.0, got {}", self.retry.multiplier);
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        let delta = self.tracker.min_percentage_delta;
        if !delta.is_finite() || !(0.0..=100.0).contains(&delta) {
            bail!("tracker.min_percentage_delta must be within 0..=100, got {delta}");
        }
        if self.tracker.subscriber_buffer == 0 {
            bail!("tracker.subscriber_buffer must be greater than 0");
        }
        if self.grouping.min_group_size < 2 {
            bail!(
                "grouping.min_group_size must be at least 2, got {}",
                self.grouping.min_group_size
            );
        }
        Ok(())
    }

    /// Apply command-line flags on top of the loaded configuration.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) {
        if let Some(workers) = args.workers {
            self.hash.worker_count = workers;
        }
        if let Some(algorithm) = args.algorithm {
            self.hash.algorithm = algorithm;
        }
        if let Some(retries) = args.max_retries {
            self.hash.max_retries = retries;
        }
        if let Some(max) = args.max_file_size {
            self.hash.max_file_size = max;
        }
        if let Some(min) = args.min_size {
            self.grouping.min_size = min;
        }
        if let Some(max) = args.max_results {
            self.grouping.max_results = max;
        }
        if !args.mime_types.is_empty() {
            self.grouping.mime_types.clone_from(&args.mime_types);
        }
        if !args.extensions.is_empty() {
            self.grouping.extensions.clone_from(&args.extensions);
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.retry.max_backoff_ms))
            .with_multiplier(self.retry.multiplier)
    }

    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::default()
            .with_throttle(ThrottleConfig {
                min_percentage_delta: self.tracker.min_percentage_delta,
                max_notifications_per_second: self.tracker.max_notifications_per_second,
            })
            .with_subscriber_buffer(self.tracker.subscriber_buffer)
    }

    /// Grouping filter built from the `grouping` section.
    #[must_use]
    pub fn file_filter(&self) -> FileFilter {
        let mut filter = FileFilter::new().with_min_size(self.grouping.min_size);
        for mime in &self.grouping.mime_types {
            filter = filter.with_mime_type(mime.as_str());
        }
        for ext in &self.grouping.extensions {
            filter = filter.with_extension(ext);
        }
        filter
    }

    #[must_use]
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings::default()
            .with_worker_count(self.hash.worker_count)
            .with_max_retries(self.hash.max_retries)
            .with_max_file_size((self.hash.max_file_size > 0).then_some(self.hash.max_file_size))
            .with_filter(self.file_filter())
            .with_min_group_size(self.grouping.min_group_size)
            .with_max_results((self.grouping.max_results > 0).then_some(self.grouping.max_results))
    }
}
