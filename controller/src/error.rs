//! Error types for the observatory controller

use domeguard_indi::IndiError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library
    #[error("Configuration error: {0}")]
    Figment(Box<figment::Error>),

    /// The specified configuration file was not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration parsed but is unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// A safety signal could not be read
#[derive(Error, Debug)]
pub enum SensorError {
    /// Weather station read failed
    #[error("weather station: {0}")]
    Indi(#[from] IndiError),

    /// Flag file could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Flag file has not been refreshed recently enough
    #[error("{} is stale ({}s old, limit {}s)", .path.display(), .age.as_secs(), .max_age.as_secs())]
    Stale {
        path: PathBuf,
        age: Duration,
        max_age: Duration,
    },

    /// Flag file content is not a recognised value
    #[error("{} contains unrecognised value '{value}'", .path.display())]
    Parse { path: PathBuf, value: String },

    /// The source has no data for this signal yet
    #[error("no data: {0}")]
    NoData(String),
}

/// A configured device could not be reached, at startup or on reconnect
#[derive(Error, Debug)]
#[error("{role} '{device}' on {address}: {source}")]
pub struct StartupError {
    pub role: &'static str,
    pub device: String,
    pub address: String,
    #[source]
    pub source: IndiError,
}
