//! INDI Protocol Client
//!
//! Property-synchronization client for INDI device servers, plus the park/unpark
//! sequencers used to stow a telescope mount and an observatory dome.
//!
//! ## Features
//!
//! - Asynchronous property cache fed by a reader task
//! - Bounded, cancellable polling for property discovery and state settling
//! - Alert detection with a short settle re-check
//! - Permission and range checks before property writes
//! - Exclusive switch rules applied before sending
//! - Device discovery with bounded retry and CONNECTION handling
//! - Mount and dome park/unpark sequences

mod client;
mod device;
mod dome;
mod error;
mod mount;
mod park;
mod protocol;
mod store;

#[cfg(test)]
mod fake;

pub use client::{Deadline, IndiClient, IndiEvent, Readiness, SETTLED_STATES};
pub use device::DeviceHandle;
pub use dome::{IndiDome, IndiShutterStatus};
pub use error::{IndiError, IndiResult};
pub use mount::IndiMount;
pub use park::{ParkControls, ParkSequencer, Parkable};
pub use protocol::{standard_properties, weather_elements, INDI_PROTOCOL_VERSION};

use std::fmt;
use std::time::Duration;

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;

/// INDI property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Switch,
    Number,
    Text,
    Light,
}

impl PropertyKind {
    /// Parse the type fragment of a vector tag (`Switch` in `defSwitchVector`)
    pub(crate) fn from_tag_fragment(fragment: &str) -> Option<Self> {
        match fragment {
            "Switch" => Some(PropertyKind::Switch),
            "Number" => Some(PropertyKind::Number),
            "Text" => Some(PropertyKind::Text),
            "Light" => Some(PropertyKind::Light),
            _ => None,
        }
    }

    /// Tag fragment used on the wire
    pub(crate) fn tag_fragment(self) -> &'static str {
        match self {
            PropertyKind::Switch => "Switch",
            PropertyKind::Number => "Number",
            PropertyKind::Text => "Text",
            PropertyKind::Light => "Light",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyKind::Switch => "switch",
            PropertyKind::Number => "number",
            PropertyKind::Text => "text",
            PropertyKind::Light => "light",
        })
    }
}

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Idle" => Some(PropertyState::Idle),
            "Ok" => Some(PropertyState::Ok),
            "Busy" => Some(PropertyState::Busy),
            "Alert" => Some(PropertyState::Alert),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        })
    }
}

/// INDI property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub(crate) fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ro" => Permission::ReadOnly,
            "wo" => Permission::WriteOnly,
            _ => Permission::ReadWrite,
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, Permission::ReadOnly)
    }
}

/// Grouping rule of a switch vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "OneOfMany" => Some(SwitchRule::OneOfMany),
            "AtMostOne" => Some(SwitchRule::AtMostOne),
            "AnyOfMany" => Some(SwitchRule::AnyOfMany),
            _ => None,
        }
    }

    /// At most one element may be on at a time
    pub fn is_exclusive(self) -> bool {
        matches!(self, SwitchRule::OneOfMany | SwitchRule::AtMostOne)
    }
}

/// Number element limits (min, max, step)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub format: Option<String>,
}

/// Current value of one element
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Switch(bool),
    Number(f64),
    Text(String),
    Light(PropertyState),
}

impl Value {
    /// Parse the wire text of an element of the given kind
    pub(crate) fn parse(kind: PropertyKind, raw: &str) -> Option<Self> {
        let raw_trimmed = raw.trim();
        match kind {
            PropertyKind::Switch => match raw_trimmed {
                "On" => Some(Value::Switch(true)),
                "Off" => Some(Value::Switch(false)),
                _ => None,
            },
            PropertyKind::Number => protocol::parse_number(raw_trimmed).map(Value::Number),
            PropertyKind::Text => Some(Value::Text(raw.to_string())),
            PropertyKind::Light => PropertyState::parse(raw_trimmed).map(Value::Light),
        }
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            Value::Switch(_) => PropertyKind::Switch,
            Value::Number(_) => PropertyKind::Number,
            Value::Text(_) => PropertyKind::Text,
            Value::Light(_) => PropertyKind::Light,
        }
    }

    pub fn as_switch(&self) -> Option<bool> {
        match self {
            Value::Switch(on) => Some(*on),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<PropertyState> {
        match self {
            Value::Light(s) => Some(*s),
            _ => None,
        }
    }
}

/// One named element of a property vector
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub label: String,
    pub value: Value,
    pub limits: Option<NumberLimits>,
}

/// An INDI property
#[derive(Debug, Clone, PartialEq)]
pub struct IndiProperty {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub kind: PropertyKind,
    pub state: PropertyState,
    pub perm: Permission,
    pub rule: Option<SwitchRule>,
    pub elements: Vec<Element>,
    /// Last message the driver attached to this property
    pub message: Option<String>,
}

impl IndiProperty {
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub(crate) fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.name == name)
    }

    /// Switch value of an element, if the element exists and is a switch
    pub fn switch(&self, name: &str) -> Option<bool> {
        self.element(name).and_then(|e| e.value.as_switch())
    }

    /// Number value of an element, if the element exists and is a number
    pub fn number(&self, name: &str) -> Option<f64> {
        self.element(name).and_then(|e| e.value.as_number())
    }

    /// Names of the switch elements currently on
    pub fn switches_on(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.value.as_switch() == Some(true))
            .map(|e| e.name.as_str())
            .collect()
    }
}

/// Timeout configuration for INDI operations
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct IndiTimeoutConfig {
    /// Connection timeout for initial TCP connection (default: 10 seconds)
    pub connection_timeout_ms: u64,
    /// Interval between property lookups while waiting for a control (default: 100ms)
    pub control_poll_interval_ms: u64,
    /// Interval between state polls while waiting for a property to settle (default: 150ms)
    pub state_poll_interval_ms: u64,
    /// Re-check delay after an Alert before reporting it (default: 500ms)
    pub alert_settle_ms: u64,
    /// Default wait for a control to appear on a device (default: 30 seconds)
    pub control_timeout_ms: u64,
    /// Park/unpark completion timeout (default: 300 seconds)
    pub park_timeout_ms: u64,
    /// How often a long Busy wait is reported (default: 10 seconds)
    pub progress_interval_ms: u64,
}

impl Default for IndiTimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 10_000,
            control_poll_interval_ms: 100,
            state_poll_interval_ms: 150,
            alert_settle_ms: 500,
            control_timeout_ms: 30_000,
            park_timeout_ms: 300_000,
            progress_interval_ms: 10_000,
        }
    }
}

impl IndiTimeoutConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn control_poll_interval(&self) -> Duration {
        Duration::from_millis(self.control_poll_interval_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms)
    }

    pub fn alert_settle(&self) -> Duration {
        Duration::from_millis(self.alert_settle_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn park_timeout(&self) -> Duration {
        Duration::from_millis(self.park_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
