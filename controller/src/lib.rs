//! Unattended observatory controller
//!
//! Reads site safety signals every cycle and parks or unparks the telescope
//! mount and dome through INDI, with hysteresis so noisy sensors do not
//! cycle the roof.
//!
//! ## Modules
//!
//! - [`config`]: layered TOML and environment configuration
//! - [`safety`]: safety signals, failure policies and the site sensors
//! - [`controller`]: the observatory state machine
//! - [`context`]: startup wiring of INDI sessions and devices, and their
//!   recovery after a server restart
//! - [`status`]: per-cycle status log and status file

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod safety;
pub mod status;

pub use config::ObservatoryConfig;
pub use context::{ObservatoryContext, SessionLink};
pub use controller::{
    ControllerSettings, CycleOutcome, Hardware, ObservatoryController, ObservatoryState, Reconnect,
};
pub use error::{ConfigError, SensorError, StartupError};
