//! Safety signals
//!
//! Six independent predicates decide whether the observatory may be open.
//! [`SafetyEvaluator`] is the source of raw readings; [`SafetyMonitor`] turns
//! read failures into values using each signal's [`FailurePolicy`].

mod daylight;
mod flag;
mod sensors;
mod weather;

pub use daylight::{solar_altitude, DaylightSensor};
pub use flag::{FlagFile, FlagValue};
pub use sensors::SiteSensors;
pub use weather::WeatherStation;

use crate::error::SensorError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Source of the six safety predicates. `true` means the condition holds
/// (it is raining, it is daytime, ...).
#[async_trait]
pub trait SafetyEvaluator: Send + Sync {
    async fn raining(&self) -> Result<bool, SensorError>;
    async fn daytime(&self) -> Result<bool, SensorError>;
    async fn cloudy(&self) -> Result<bool, SensorError>;
    async fn bad_weather(&self) -> Result<bool, SensorError>;
    async fn aurora_exceeded(&self) -> Result<bool, SensorError>;
    async fn smoke_heavy(&self) -> Result<bool, SensorError>;
}

/// One of the safety predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Raining,
    Daytime,
    Cloudy,
    BadWeather,
    AuroraExceeded,
    SmokeHeavy,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::Raining,
        Signal::Daytime,
        Signal::Cloudy,
        Signal::BadWeather,
        Signal::AuroraExceeded,
        Signal::SmokeHeavy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Raining => "raining",
            Signal::Daytime => "daytime",
            Signal::Cloudy => "cloudy",
            Signal::BadWeather => "bad_weather",
            Signal::AuroraExceeded => "aurora_exceeded",
            Signal::SmokeHeavy => "smoke_heavy",
        }
    }

    /// What a failed read counts as
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            Signal::Raining | Signal::Daytime | Signal::BadWeather => FailurePolicy::AssumeUnsafe,
            Signal::Cloudy => FailurePolicy::KeepLast,
            Signal::AuroraExceeded | Signal::SmokeHeavy => FailurePolicy::AssumeSafe,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value substituted when a signal cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Treat as `true`
    AssumeUnsafe,
    /// Treat as `false`
    AssumeSafe,
    /// Reuse the previous reading, `true` if there is none
    KeepLast,
}

impl FailurePolicy {
    fn substitute(self, last: Option<bool>) -> bool {
        match self {
            FailurePolicy::AssumeUnsafe => true,
            FailurePolicy::AssumeSafe => false,
            FailurePolicy::KeepLast => last.unwrap_or(true),
        }
    }
}

/// All six predicates for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SafetyReadings {
    pub raining: bool,
    pub daytime: bool,
    pub cloudy: bool,
    pub bad_weather: bool,
    pub aurora_exceeded: bool,
    pub smoke_heavy: bool,
}

impl SafetyReadings {
    /// Rain or daylight: close now, without hysteresis
    pub fn must_close(&self) -> bool {
        self.raining || self.daytime
    }

    /// Conditions that close the observatory after hysteresis
    pub fn is_unsafe(&self) -> bool {
        self.cloudy || self.bad_weather || self.aurora_exceeded || self.smoke_heavy
    }

    pub fn get(&self, signal: Signal) -> bool {
        match signal {
            Signal::Raining => self.raining,
            Signal::Daytime => self.daytime,
            Signal::Cloudy => self.cloudy,
            Signal::BadWeather => self.bad_weather,
            Signal::AuroraExceeded => self.aurora_exceeded,
            Signal::SmokeHeavy => self.smoke_heavy,
        }
    }

    fn set(&mut self, signal: Signal, value: bool) {
        match signal {
            Signal::Raining => self.raining = value,
            Signal::Daytime => self.daytime = value,
            Signal::Cloudy => self.cloudy = value,
            Signal::BadWeather => self.bad_weather = value,
            Signal::AuroraExceeded => self.aurora_exceeded = value,
            Signal::SmokeHeavy => self.smoke_heavy = value,
        }
    }
}

/// Reads an evaluator and applies the failure policies
pub struct SafetyMonitor {
    evaluator: Box<dyn SafetyEvaluator>,
    last: Option<SafetyReadings>,
}

impl SafetyMonitor {
    pub fn new(evaluator: Box<dyn SafetyEvaluator>) -> Self {
        Self {
            evaluator,
            last: None,
        }
    }

    /// Swap in a new evaluator, keeping the last readings for
    /// [`FailurePolicy::KeepLast`] signals
    pub fn replace_evaluator(&mut self, evaluator: Box<dyn SafetyEvaluator>) {
        self.evaluator = evaluator;
    }

    async fn read_signal(&self, signal: Signal) -> Result<bool, SensorError> {
        match signal {
            Signal::Raining => self.evaluator.raining().await,
            Signal::Daytime => self.evaluator.daytime().await,
            Signal::Cloudy => self.evaluator.cloudy().await,
            Signal::BadWeather => self.evaluator.bad_weather().await,
            Signal::AuroraExceeded => self.evaluator.aurora_exceeded().await,
            Signal::SmokeHeavy => self.evaluator.smoke_heavy().await,
        }
    }

    /// Read every signal; never fails
    pub async fn read(&mut self) -> SafetyReadings {
        let mut readings = SafetyReadings::default();
        for signal in Signal::ALL {
            let value = match self.read_signal(signal).await {
                Ok(value) => value,
                Err(e) => {
                    let policy = signal.failure_policy();
                    let value = policy.substitute(self.last.map(|r| r.get(signal)));
                    tracing::warn!(
                        signal = signal.name(),
                        error = %e,
                        assumed = value,
                        "Safety signal unavailable ({:?})",
                        policy
                    );
                    value
                }
            };
            readings.set(signal, value);
        }
        self.last = Some(readings);
        readings
    }
}
