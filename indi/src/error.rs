//! INDI error types
//!
//! Provides structured error types for INDI operations.

use crate::{PropertyKind, PropertyState};
use std::time::Duration;

/// INDI client errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndiError {
    /// Connection to INDI server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout with context
    #[error("Connection timeout: failed to connect to {host}:{port} after {duration:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },

    /// Device never appeared within the discovery attempts
    #[error("Device '{device}' not found after {attempts} discovery attempts")]
    DeviceNotFound { device: String, attempts: u32 },

    /// Property not found
    #[error("Property not found: {device}.{property}")]
    PropertyNotFound { device: String, property: String },

    /// Property did not appear or settle before its deadline
    #[error("Property timeout for {device}.{property} after {duration:?}{}", last_state_suffix(.last_state))]
    PropertyTimeout {
        device: String,
        property: String,
        duration: Duration,
        last_state: Option<PropertyState>,
    },

    /// Device reported Alert on the property being waited on
    #[error("Device alert on {device}.{property}{}", message_suffix(.message))]
    DeviceAlert {
        device: String,
        property: String,
        message: Option<String>,
    },

    /// Permission denied (attempted to write to read-only property)
    #[error("Permission denied: {device}.{property} is read-only")]
    PermissionDenied { device: String, property: String },

    /// Property exists but has a different type than requested
    #[error("Property {device}.{property} is a {actual} property, expected {expected}")]
    WrongKind {
        device: String,
        property: String,
        expected: PropertyKind,
        actual: PropertyKind,
    },

    /// Property value out of range
    #[error("Value {value} out of range [{min}, {max}] for {device}.{property}.{element}")]
    ValueOutOfRange {
        device: String,
        property: String,
        element: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A park/unpark sequence failed
    #[error("{action} of '{device}' failed: {source}")]
    Operation {
        device: String,
        action: &'static str,
        #[source]
        source: Box<IndiError>,
    },

    /// XML parse error
    #[error("XML parse error: {0}")]
    Parse(String),

    /// Send channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Not connected to server
    #[error("Not connected to INDI server")]
    NotConnected,

    /// Wait aborted because the session was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl IndiError {
    /// Wrap an error raised inside a park/unpark sequence
    pub fn operation(device: &str, action: &'static str, source: IndiError) -> Self {
        IndiError::Operation {
            device: device.to_string(),
            action,
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `Operation` wrappers
    pub fn root(&self) -> &IndiError {
        match self {
            IndiError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the error only reflects a shutdown request
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), IndiError::Cancelled)
    }
}

fn last_state_suffix(state: &Option<PropertyState>) -> String {
    state
        .map(|s| format!(" (last state: {})", s))
        .unwrap_or_default()
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_ref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

impl From<quick_xml::Error> for IndiError {
    fn from(err: quick_xml::Error) -> Self {
        IndiError::Parse(err.to_string())
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;
