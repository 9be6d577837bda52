//! INDI Dome wrapper
//!
//! Parks and unparks a dome or roll-off roof through `DOME_PARK`. Parking a
//! dome driver closes its shutter; the shutter switch is reported when the
//! driver has one.

use crate::device::DeviceHandle;
use crate::error::IndiResult;
use crate::park::{ParkControls, ParkSequencer, Parkable};
use crate::PropertyState;
use async_trait::async_trait;
use std::time::Duration;

const DOME_SHUTTER: &str = "DOME_SHUTTER";
const SHUTTER_OPEN: &str = "SHUTTER_OPEN";
const SHUTTER_CLOSE: &str = "SHUTTER_CLOSE";

/// Shutter status for INDI domes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndiShutterStatus {
    Open,
    Closed,
    Opening,
    Closing,
    Error,
    Unknown,
}

/// INDI Dome device wrapper
#[derive(Debug)]
pub struct IndiDome {
    sequencer: ParkSequencer,
}

impl IndiDome {
    /// Create a dome wrapper around a resolved device
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            sequencer: ParkSequencer::new(device, "dome", ParkControls::DOME),
        }
    }

    /// Override the park/unpark completion timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            sequencer: self.sequencer.with_timeout(timeout),
        }
    }

    /// Get the device name
    pub fn device_name(&self) -> &str {
        self.sequencer.device().name()
    }

    /// Shutter status from `DOME_SHUTTER`, if the driver defines it
    pub async fn shutter_status(&self) -> IndiShutterStatus {
        let device = self.sequencer.device();
        let Some(prop) = device.client().property(device.name(), DOME_SHUTTER).await else {
            return IndiShutterStatus::Unknown;
        };
        let open = prop.switch(SHUTTER_OPEN).unwrap_or(false);
        let close = prop.switch(SHUTTER_CLOSE).unwrap_or(false);
        match (prop.state, open, close) {
            (PropertyState::Alert, _, _) => IndiShutterStatus::Error,
            (PropertyState::Busy, true, _) => IndiShutterStatus::Opening,
            (PropertyState::Busy, _, true) => IndiShutterStatus::Closing,
            (_, true, false) => IndiShutterStatus::Open,
            (_, false, true) => IndiShutterStatus::Closed,
            _ => IndiShutterStatus::Unknown,
        }
    }
}

#[async_trait]
impl Parkable for IndiDome {
    fn role(&self) -> &str {
        self.sequencer.role()
    }

    fn device(&self) -> &str {
        self.device_name()
    }

    async fn park(&self) -> IndiResult<()> {
        self.sequencer.park().await?;
        let shutter = self.shutter_status().await;
        if shutter != IndiShutterStatus::Unknown {
            tracing::info!("dome '{}': shutter {:?}", self.device_name(), shutter);
        }
        Ok(())
    }

    async fn unpark(&self) -> IndiResult<()> {
        self.sequencer.unpark().await
    }

    async fn is_parked(&self) -> IndiResult<bool> {
        self.sequencer.is_parked().await
    }
}
