//! INDI Mount wrapper
//!
//! Parks and unparks a telescope mount through `TELESCOPE_PARK`.

use crate::device::DeviceHandle;
use crate::error::IndiResult;
use crate::park::{ParkControls, ParkSequencer, Parkable};
use async_trait::async_trait;
use std::time::Duration;

/// INDI Mount device wrapper
#[derive(Debug)]
pub struct IndiMount {
    sequencer: ParkSequencer,
}

impl IndiMount {
    /// Create a mount wrapper around a resolved device
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            sequencer: ParkSequencer::new(device, "mount", ParkControls::MOUNT),
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
}

#[async_trait]
impl Parkable for IndiMount {
    fn role(&self) -> &str {
        self.sequencer.role()
    }

    fn device(&self) -> &str {
        self.device_name()
    }

    async fn park(&self) -> IndiResult<()> {
        self.sequencer.park().await
    }

    async fn unpark(&self) -> IndiResult<()> {
        self.sequencer.unpark().await
    }

    async fn is_parked(&self) -> IndiResult<bool> {
        self.sequencer.is_parked().await
    }
}
