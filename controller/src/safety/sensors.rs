//! Site sensor suite: the solar model, an optional INDI weather station and
//! optional flag files, combined into one [`SafetyEvaluator`].

use super::{DaylightSensor, FlagFile, SafetyEvaluator, Signal, WeatherStation};
use crate::config::{FlagFilesConfig, SiteConfig, ThresholdConfig};
use crate::error::SensorError;
use async_trait::async_trait;

/// Evaluator backed by the configured site sensors
///
/// A signal without a configured source always reads `false`.
pub struct SiteSensors {
    daylight: DaylightSensor,
    weather: Option<WeatherStation>,
    cloud: Option<FlagFile>,
    aurora: Option<FlagFile>,
    smoke: Option<FlagFile>,
    max_aurora: f64,
}

impl SiteSensors {
    pub fn new(
        site: &SiteConfig,
        thresholds: &ThresholdConfig,
        files: &FlagFilesConfig,
        weather: Option<WeatherStation>,
    ) -> Self {
        let flag = |path: &Option<std::path::PathBuf>| {
            path.clone().map(|p| FlagFile::new(p, files.max_age()))
        };
        Self {
            daylight: DaylightSensor::new(site.latitude, site.longitude, site.sun_altitude_limit_deg),
            weather,
            cloud: flag(&files.cloud),
            aurora: flag(&files.aurora),
            smoke: flag(&files.smoke),
            max_aurora: thresholds.max_aurora,
        }
    }

    /// Signals that have no source and will always read `false`
    pub fn unconfigured(&self) -> Vec<Signal> {
        let weather = self.weather.is_some();
        Signal::ALL
            .into_iter()
            .filter(|signal| match signal {
                Signal::Daytime => false,
                Signal::Raining | Signal::BadWeather => !weather,
                Signal::Cloudy => self.cloud.is_none(),
                Signal::AuroraExceeded => self.aurora.is_none(),
                Signal::SmokeHeavy => self.smoke.is_none(),
            })
            .collect()
    }

    /// Log the configured sources once at startup
    pub fn log_sources(&self) {
        if let Some(weather) = &self.weather {
            tracing::info!("Rain and wind from INDI weather station '{}'", weather.device_name());
        }
        for (signal, file) in [
            (Signal::Cloudy, &self.cloud),
            (Signal::AuroraExceeded, &self.aurora),
            (Signal::SmokeHeavy, &self.smoke),
        ] {
            if let Some(file) = file {
                tracing::info!("{} from {}", signal, file.path().display());
            }
        }
        for signal in self.unconfigured() {
            tracing::warn!("No source configured for '{}'; it will always read false", signal);
        }
    }
}

#[async_trait]
impl SafetyEvaluator for SiteSensors {
    async fn raining(&self) -> Result<bool, SensorError> {
        match &self.weather {
            Some(weather) => weather.raining().await,
            None => Ok(false),
        }
    }

    async fn daytime(&self) -> Result<bool, SensorError> {
        Ok(self.daylight.is_daytime())
    }

    async fn cloudy(&self) -> Result<bool, SensorError> {
        match &self.cloud {
            Some(file) => file.read_bool().await,
            None => Ok(false),
        }
    }

    async fn bad_weather(&self) -> Result<bool, SensorError> {
        match &self.weather {
            Some(weather) => weather.bad_weather().await,
            None => Ok(false),
        }
    }

    async fn aurora_exceeded(&self) -> Result<bool, SensorError> {
        match &self.aurora {
            Some(file) => Ok(file.read_number().await? > self.max_aurora),
            None => Ok(false),
        }
    }

    async fn smoke_heavy(&self) -> Result<bool, SensorError> {
        match &self.smoke {
            Some(file) => file.read_bool().await,
            None => Ok(false),
        }
    }
}
