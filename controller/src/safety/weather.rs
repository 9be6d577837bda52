//! INDI weather station as a rain and wind source
//!
//! INDI weather drivers publish a `WEATHER_STATUS` light vector (one light per
//! monitored parameter) and a `WEATHER_PARAMETERS` number vector with the raw
//! readings. Rain is taken from either; wind from the raw speed, checked
//! against an instantaneous and a rolling-average limit.

use crate::config::ThresholdConfig;
use crate::error::SensorError;
use domeguard_indi::standard_properties::{WEATHER_PARAMETERS, WEATHER_STATUS};
use domeguard_indi::weather_elements::{WEATHER_RAIN, WEATHER_RAIN_RATE, WEATHER_WIND, WEATHER_WIND_SPEED};
use domeguard_indi::{DeviceHandle, IndiError, PropertyKind, PropertyState, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Weather device wrapper
pub struct WeatherStation {
    device: DeviceHandle,
    max_wind: f64,
    max_avg_wind: f64,
    window: usize,
    wind_samples: Mutex<VecDeque<f64>>,
}

impl WeatherStation {
    pub fn new(device: DeviceHandle, thresholds: &ThresholdConfig) -> Self {
        let window = thresholds.wind_window.max(1);
        Self {
            device,
            max_wind: thresholds.max_wind,
            max_avg_wind: thresholds.max_avg_wind,
            window,
            wind_samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Values of a property, `None` when the driver does not define it
    async fn values(&self, name: &str, kind: PropertyKind) -> Result<Option<HashMap<String, Value>>, SensorError> {
        match self
            .device
            .client()
            .read_values(self.device.name(), name, kind)
            .await
        {
            Ok(values) => Ok(Some(values)),
            Err(IndiError::PropertyNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn light_alert(lights: &HashMap<String, Value>, element: &str) -> Option<bool> {
        lights
            .get(element)
            .and_then(Value::as_light)
            .map(|state| state == PropertyState::Alert)
    }

    fn number(params: &HashMap<String, Value>, element: &str) -> Option<f64> {
        params.get(element).and_then(Value::as_number)
    }

    /// Rain light in Alert, or a positive rain rate
    pub async fn raining(&self) -> Result<bool, SensorError> {
        let lights = self.values(WEATHER_STATUS, PropertyKind::Light).await?;
        let params = self.values(WEATHER_PARAMETERS, PropertyKind::Number).await?;

        let alert = lights.as_ref().and_then(|l| Self::light_alert(l, WEATHER_RAIN));
        let rate = params.as_ref().and_then(|p| Self::number(p, WEATHER_RAIN_RATE));

        match (alert, rate) {
            (None, None) => Err(SensorError::NoData(format!(
                "{} reports neither {} nor {}",
                self.device.name(),
                WEATHER_RAIN,
                WEATHER_RAIN_RATE
            ))),
            (alert, rate) => {
                let raining = alert.unwrap_or(false) || rate.map(|r| r > 0.0).unwrap_or(false);
                tracing::debug!(
                    "{}: rain alert={:?} rate={:?} -> {}",
                    self.device.name(),
                    alert,
                    rate,
                    raining
                );
                Ok(raining)
            }
        }
    }

    /// Wind speed above `max_wind`, its rolling average above `max_avg_wind`,
    /// or the driver's own wind light in Alert
    pub async fn bad_weather(&self) -> Result<bool, SensorError> {
        let params = self.values(WEATHER_PARAMETERS, PropertyKind::Number).await?;
        let lights = self.values(WEATHER_STATUS, PropertyKind::Light).await?;

        let speed = params.as_ref().and_then(|p| Self::number(p, WEATHER_WIND_SPEED));
        let alert = lights.as_ref().and_then(|l| Self::light_alert(l, WEATHER_WIND));

        let Some(speed) = speed else {
            return match alert {
                Some(alert) => Ok(alert),
                None => Err(SensorError::NoData(format!(
                    "{} reports no {}",
                    self.device.name(),
                    WEATHER_WIND_SPEED
                ))),
            };
        };

        let average = self.record_wind(speed);
        let too_windy = speed > self.max_wind || average > self.max_avg_wind;
        if too_windy {
            tracing::info!(
                "{}: wind {:.1} (avg {:.1}) exceeds limits {:.1}/{:.1}",
                self.device.name(),
                speed,
                average,
                self.max_wind,
                self.max_avg_wind
            );
        }
        Ok(too_windy || alert.unwrap_or(false))
    }

    /// Push a sample and return the average over the window
    fn record_wind(&self, speed: f64) -> f64 {
        let mut samples = self
            .wind_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(speed);
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}
