//! Configuration management for smartband.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::LocationFix;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "smartband";

/// Default journal database file name.
const DATABASE_FILE_NAME: &str = "journal.db";

/// Replacement shown for secrets.
const REDACTED: &str = "********";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "SMARTBAND_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SMARTBAND_`, sections split by `__`)
/// 2. TOML config file at `~/.config/smartband/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Polling loop configuration.
    pub monitor: MonitorConfig,
    /// Fall classifier configuration.
    pub classifier: ClassifierConfig,
    /// Notification relay configuration.
    pub relay: RelayConfig,
    /// Location fallback configuration.
    pub location: LocationConfig,
    /// Event journal configuration.
    pub storage: StorageConfig,
}

/// Network-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP server listens on.
    pub bind_address: String,
    /// Host name advertised on the local network.
    pub hostname: String,
    /// Wireless network name used by the station-join collaborator.
    pub wifi_ssid: Option<String>,
    /// Wireless network passphrase.
    pub wifi_password: Option<String>,
}

/// Polling loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between sensor polls in milliseconds.
    pub poll_interval_ms: u64,
}

/// Which fall-detection policy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallPolicy {
    /// Free-fall dip, impact, rotation burst, then stillness.
    #[default]
    Envelope,
    /// Sustained inversion of the vertical axis.
    Orientation,
}

impl std::fmt::Display for FallPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Envelope => write!(f, "envelope"),
            Self::Orientation => write!(f, "orientation"),
        }
    }
}

/// Fall classifier configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Active policy.
    pub policy: FallPolicy,
    /// Thresholds for the envelope policy.
    pub envelope: EnvelopeConfig,
    /// Thresholds for the orientation policy.
    pub orientation: OrientationConfig,
}

/// Envelope policy thresholds.
///
/// Windows and dwell are counted in samples, so their wall-clock length
/// scales with `monitor.poll_interval_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Acceleration magnitude at or below which free fall is suspected (g).
    pub low_threshold_g: f64,
    /// Acceleration magnitude at or above which an impact is recorded (g).
    pub high_threshold_g: f64,
    /// Samples allowed between the free-fall dip and the impact.
    pub impact_window: u32,
    /// Lower bound of the tumbling band (deg/s).
    pub rotation_min_dps: f64,
    /// Upper bound of the tumbling band (deg/s).
    pub rotation_max_dps: f64,
    /// Samples allowed between the impact and the rotation burst.
    pub rotation_window: u32,
    /// Samples to wait after the rotation burst before checking stillness.
    pub settle_dwell: u32,
    /// Upper bound of the at-rest band (deg/s).
    pub rest_max_dps: f64,
    /// How long a confirmed fall stays latched (seconds).
    pub latch_secs: u64,
}

/// Orientation policy thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationConfig {
    /// Vertical acceleration below which the device counts as inverted (m/s²).
    pub inverted_threshold_ms2: f64,
    /// How long inversion must persist before confirming (milliseconds).
    pub confirm_after_ms: u64,
}

/// Notification relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Send notifications on confirmed falls.
    pub enabled: bool,
    /// Relay endpoint URL.
    pub url: String,
    /// Bearer token for the relay, if it requires one.
    pub api_key: Option<String>,
    /// Recipient identifier (phone number).
    pub recipient: String,
    /// Message template identifier.
    pub template_id: String,
    /// Human-readable device label included in the message.
    pub device_name: String,
    /// Minimum seconds between two notification attempts.
    pub cooldown_secs: u64,
    /// Connection attempts per notification.
    pub max_attempts: u32,
    /// Fixed delay between connection attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Connection timeout per attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long to wait for the relay's response in milliseconds.
    pub response_timeout_ms: u64,
}

/// Location fallback configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Latitude reported before the first satellite fix.
    pub default_latitude: f64,
    /// Longitude reported before the first satellite fix.
    pub default_longitude: f64,
}

/// Event journal configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record confirmed episodes and alert outcomes.
    pub journal_enabled: bool,
    /// Path to the journal database.
    /// Defaults to `~/.local/share/smartband/journal.db`
    pub database_path: Option<PathBuf>,
    /// Maximum age of journal entries in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            hostname: "smartband".to_string(),
            wifi_ssid: None,
            wifi_password: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            low_threshold_g: 0.5,
            high_threshold_g: 0.8,
            impact_window: 6,
            rotation_min_dps: 30.0,
            rotation_max_dps: 400.0,
            rotation_window: 6,
            settle_dwell: 10,
            rest_max_dps: 10.0,
            latch_secs: 30,
        }
    }
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            inverted_threshold_ms2: 0.0,
            confirm_after_ms: 3_000,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Opt-in only
            url: String::new(),
            api_key: None,
            recipient: String::new(),
            template_id: String::new(),
            device_name: "Smart Band".to_string(),
            cooldown_secs: 60,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
            connect_timeout_ms: 5_000,
            response_timeout_ms: 15_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_enabled: true,
            database_path: None, // Resolved to default at runtime
            max_age_days: 90,
        }
    }
}

impl EnvelopeConfig {
    /// Get the latch window as a Duration.
    #[must_use]
    pub fn latch(&self) -> Duration {
        Duration::from_secs(self.latch_secs)
    }
}

impl OrientationConfig {
    /// Get the confirmation delay as a Duration.
    #[must_use]
    pub fn confirm_after(&self) -> Duration {
        Duration::from_millis(self.confirm_after_ms)
    }
}

impl RelayConfig {
    /// Get the cooldown as a Duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Get the retry backoff as a Duration.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Get the connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the response timeout as a Duration.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(Error::config_validation(
                "poll_interval_ms must be greater than 0",
            ));
        }

        let envelope = &self.classifier.envelope;
        if envelope.low_threshold_g >= envelope.high_threshold_g {
            return Err(Error::config_validation(format!(
                "low_threshold_g ({}) must be below high_threshold_g ({})",
                envelope.low_threshold_g, envelope.high_threshold_g
            )));
        }
        if envelope.rotation_min_dps > envelope.rotation_max_dps {
            return Err(Error::config_validation(format!(
                "rotation_min_dps ({}) cannot be greater than rotation_max_dps ({})",
                envelope.rotation_min_dps, envelope.rotation_max_dps
            )));
        }
        if envelope.impact_window == 0 || envelope.rotation_window == 0 {
            return Err(Error::config_validation(
                "impact_window and rotation_window must be greater than 0",
            ));
        }
        if envelope.settle_dwell == 0 {
            return Err(Error::config_validation(
                "settle_dwell must be greater than 0",
            ));
        }

        if !self.default_location().is_valid() {
            return Err(Error::config_validation(format!(
                "default location ({}, {}) is out of range",
                self.location.default_latitude, self.location.default_longitude
            )));
        }

        let relay = &self.relay;
        if relay.max_attempts == 0 {
            return Err(Error::config_validation(
                "max_attempts must be greater than 0",
            ));
        }
        if relay.response_timeout_ms == 0 {
            return Err(Error::config_validation(
                "response_timeout_ms must be greater than 0",
            ));
        }
        if relay.enabled {
            if relay.url.is_empty() || relay.recipient.is_empty() {
                return Err(Error::config_validation(
                    "relay url and recipient are required when the relay is enabled",
                ));
            }
            if !(relay.url.starts_with("http://") || relay.url.starts_with("https://")) {
                return Err(Error::config_validation(format!(
                    "relay url must be http(s): {}",
                    relay.url
                )));
            }
        }

        Ok(())
    }

    /// Get the journal path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// Get the journal max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Location reported before any satellite fix.
    #[must_use]
    pub fn default_location(&self) -> LocationFix {
        LocationFix::new(
            self.location.default_latitude,
            self.location.default_longitude,
        )
    }

    /// Copy of the configuration with secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());
        let mut copy = self.clone();
        copy.network.wifi_password = mask(&self.network.wifi_password);
        copy.relay.api_key = mask(&self.relay.api_key);
        copy
    }
}
