//! Observatory configuration with layered loading.
//!
//! Settings come from a TOML file; environment variables prefixed with
//! `DOMEGUARD_` override them (`DOMEGUARD_SITE__LATITUDE=52.1`).

use crate::error::ConfigError;
use domeguard_indi::{IndiTimeoutConfig, INDI_DEFAULT_PORT};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which hardware the controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Mount and dome (or roll-off roof)
    Dome,
    /// Mount only, for sites without a controllable enclosure
    Telescope,
}

/// How the open direction counts favorable cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenHysteresis {
    /// The count is re-armed to 1 every favorable cycle; the roof opens on
    /// the first favorable cycle observed while already waiting to open
    Rearm,
    /// The count accumulates and the roof opens at `max_pending`
    Accumulate,
}

/// What happens when the threshold park cannot be confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParkFailurePolicy {
    /// Log the failure and record the observatory as closed anyway
    Commit,
    /// Stay close-pending so the next cycle parks again
    Retry,
}

/// One INDI server and the device on it
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub device: String,
}

impl EndpointConfig {
    /// `host:port`, used to share one session between devices
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

const fn default_port() -> u16 {
    INDI_DEFAULT_PORT
}

/// Device discovery retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Checks before a device is declared missing
    pub attempts: u32,
    /// Pause between checks
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Recovery of INDI sessions that dropped while running
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Connection attempts per cycle before giving up until the next one
    pub attempts: u32,
    /// Pause between attempts
    pub interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval_ms: 5_000,
        }
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Weather limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Instantaneous wind speed limit (station units, usually km/h)
    pub max_wind: f64,
    /// Limit for the rolling average wind speed
    pub max_avg_wind: f64,
    /// Number of samples in the rolling average
    pub wind_window: usize,
    /// Aurora index above which the sky is unusable
    pub max_aurora: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_wind: 40.0,
            max_avg_wind: 30.0,
            wind_window: 10,
            max_aurora: 5.0,
        }
    }
}

/// Observatory location
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Solar altitude above which it counts as daytime
    #[serde(default = "default_sun_altitude_limit")]
    pub sun_altitude_limit_deg: f64,
}

const fn default_sun_altitude_limit() -> f64 {
    -12.0
}

/// Value files maintained by external classifiers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagFilesConfig {
    /// Cloud classifier output (`true`/`false`)
    pub cloud: Option<PathBuf>,
    /// Aurora index (number)
    pub aurora: Option<PathBuf>,
    /// Smoke check output (`true`/`false`)
    pub smoke: Option<PathBuf>,
    /// Files older than this are treated as unreadable
    pub max_age_secs: u64,
}

impl Default for FlagFilesConfig {
    fn default() -> Self {
        Self {
            cloud: None,
            aurora: None,
            smoke: None,
            max_age_secs: 900,
        }
    }
}

impl FlagFilesConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Top-level observatory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObservatoryConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// Telescope mount endpoint
    pub mount: EndpointConfig,

    /// Dome/roof endpoint (required in dome mode)
    #[serde(default)]
    pub dome: Option<EndpointConfig>,

    /// INDI weather station providing rain and wind
    #[serde(default)]
    pub weather: Option<EndpointConfig>,

    /// Seconds between evaluation cycles
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,

    /// Seconds to wait after a rain/daylight close
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Consecutive cycles required before acting on a pending transition
    #[serde(default = "default_max_pending")]
    pub max_pending: u32,

    #[serde(default = "default_open_hysteresis")]
    pub open_hysteresis: OpenHysteresis,

    #[serde(default = "default_park_failure")]
    pub park_failure: ParkFailurePolicy,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub timeouts: IndiTimeoutConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    pub site: SiteConfig,

    #[serde(default)]
    pub files: FlagFilesConfig,

    /// JSON status written after every cycle
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

const fn default_mode() -> Mode {
    Mode::Dome
}

const fn default_cycle_secs() -> u64 {
    60
}

const fn default_cooldown_secs() -> u64 {
    300
}

const fn default_max_pending() -> u32 {
    10
}

const fn default_open_hysteresis() -> OpenHysteresis {
    OpenHysteresis::Rearm
}

const fn default_park_failure() -> ParkFailurePolicy {
    ParkFailurePolicy::Commit
}

impl ObservatoryConfig {
    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `DOMEGUARD_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DOMEGUARD_").split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new().merge(Toml::string(content)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid("max_pending must be at least 1".into()));
        }
        if self.cycle_secs == 0 {
            return Err(ConfigError::Invalid("cycle_secs must be at least 1".into()));
        }
        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return Err(ConfigError::Invalid(format!(
                "site.latitude {} is outside [-90, 90]",
                self.site.latitude
            )));
        }
        if !(-180.0..=360.0).contains(&self.site.longitude) {
            return Err(ConfigError::Invalid(format!(
                "site.longitude {} is outside [-180, 360]",
                self.site.longitude
            )));
        }
        if self.mode == Mode::Dome && self.dome.is_none() {
            return Err(ConfigError::Invalid(
                "mode = \"dome\" requires a [dome] endpoint".into(),
            ));
        }
        if self.thresholds.wind_window == 0 {
            return Err(ConfigError::Invalid(
                "thresholds.wind_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Dome endpoint, when this mode drives one
    pub fn enclosure(&self) -> Option<&EndpointConfig> {
        match self.mode {
            Mode::Dome => self.dome.as_ref(),
            Mode::Telescope => None,
        }
    }
}
