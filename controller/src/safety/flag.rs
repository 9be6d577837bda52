//! Value files written by external classifiers
//!
//! A flag file holds a single value: a boolean (`true`, `false`, `1`, `0`,
//! `yes`, `no`) or a number. Files not modified within `max_age` are stale.

use crate::error::SensorError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Parsed content of a flag file
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
}

impl FlagValue {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => return Some(FlagValue::Bool(true)),
            "false" | "no" | "off" => return Some(FlagValue::Bool(false)),
            _ => {}
        }
        raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(FlagValue::Number)
    }

    /// Numbers count as true when non-zero
    pub fn as_bool(self) -> bool {
        match self {
            FlagValue::Bool(b) => b,
            FlagValue::Number(n) => n != 0.0,
        }
    }
}

/// One flag file and its freshness limit
#[derive(Debug, Clone)]
pub struct FlagFile {
    path: PathBuf,
    max_age: Duration,
}

impl FlagFile {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file, rejecting stale content
    pub async fn read(&self) -> Result<FlagValue, SensorError> {
        let io_err = |source| SensorError::Io {
            path: self.path.clone(),
            source,
        };

        let metadata = tokio::fs::metadata(&self.path).await.map_err(io_err)?;
        let modified = metadata.modified().map_err(io_err)?;
        // A clock step backwards makes the file look new, which is fine
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            return Err(SensorError::Stale {
                path: self.path.clone(),
                age,
                max_age: self.max_age,
            });
        }

        let content = tokio::fs::read_to_string(&self.path).await.map_err(io_err)?;
        FlagValue::parse(&content).ok_or_else(|| SensorError::Parse {
            path: self.path.clone(),
            value: content.trim().chars().take(40).collect(),
        })
    }

    pub async fn read_bool(&self) -> Result<bool, SensorError> {
        Ok(self.read().await?.as_bool())
    }

    /// Numeric content; booleans are rejected
    pub async fn read_number(&self) -> Result<f64, SensorError> {
        match self.read().await? {
            FlagValue::Number(n) => Ok(n),
            FlagValue::Bool(b) => Err(SensorError::Parse {
                path: self.path.clone(),
                value: b.to_string(),
            }),
        }
    }
}
