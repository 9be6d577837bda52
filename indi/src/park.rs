//! Park/unpark sequencing for mounts and domes
//!
//! Both roles drive a `OneOfMany` switch with `PARK`/`UNPARK` elements and
//! wait for the driver to settle the property. Failures are wrapped in
//! [`IndiError::Operation`] so callers see which device and action failed.

use crate::client::{Deadline, SETTLED_STATES};
use crate::device::DeviceHandle;
use crate::error::{IndiError, IndiResult};
use crate::protocol::standard_properties::{DOME_PARK, PARK, TELESCOPE_PARK, UNPARK};
use crate::PropertyKind;
use async_trait::async_trait;
use std::time::Duration;

/// Something the observatory can stow and release
#[async_trait]
pub trait Parkable: Send + Sync {
    /// Role name used in logs ("mount", "dome")
    fn role(&self) -> &str;

    /// Device name on the INDI server
    fn device(&self) -> &str;

    /// Park and wait for the device to confirm
    async fn park(&self) -> IndiResult<()>;

    /// Unpark and wait for the device to confirm
    async fn unpark(&self) -> IndiResult<()>;

    /// Single immediate read of the park state
    async fn is_parked(&self) -> IndiResult<bool>;
}

/// Property and element names of a park switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkControls {
    pub property: &'static str,
    pub park: &'static str,
    pub unpark: &'static str,
}

impl ParkControls {
    pub const MOUNT: ParkControls = ParkControls {
        property: TELESCOPE_PARK,
        park: PARK,
        unpark: UNPARK,
    };

    pub const DOME: ParkControls = ParkControls {
        property: DOME_PARK,
        park: PARK,
        unpark: UNPARK,
    };
}

/// Drives one device through park/unpark
#[derive(Debug)]
pub struct ParkSequencer {
    device: DeviceHandle,
    role: &'static str,
    controls: ParkControls,
    timeout: Duration,
    progress_interval: Duration,
}

impl ParkSequencer {
    pub fn new(device: DeviceHandle, role: &'static str, controls: ParkControls) -> Self {
        let config = device.client().timeout_config();
        let timeout = config.park_timeout();
        let progress_interval = config.progress_interval();
        Self {
            device,
            role,
            controls,
            timeout,
            progress_interval,
        }
    }

    /// Override the park/unpark completion timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub async fn park(&self) -> IndiResult<()> {
        self.run("park", self.controls.park, self.controls.unpark)
            .await
    }

    pub async fn unpark(&self) -> IndiResult<()> {
        self.run("unpark", self.controls.unpark, self.controls.park)
            .await
    }

    pub async fn is_parked(&self) -> IndiResult<bool> {
        let prop = self
            .device
            .control(self.controls.property, PropertyKind::Switch)
            .await?;
        prop.switch(self.controls.park).ok_or_else(|| IndiError::PropertyNotFound {
            device: self.device.name().to_string(),
            property: format!("{}.{}", self.controls.property, self.controls.park),
        })
    }

    async fn run(&self, action: &'static str, on: &str, off: &str) -> IndiResult<()> {
        let name = self.device.name();
        self.sequence(action, on, off)
            .await
            .map_err(|e| IndiError::operation(name, action, e))
    }

    async fn sequence(&self, action: &str, on: &str, off: &str) -> IndiResult<()> {
        let name = self.device.name();
        let property = self.controls.property;
        let client = self.device.client();

        self.device.control(property, PropertyKind::Switch).await?;
        client
            .set_switch(name, property, &[on], &[off], Deadline::Immediate)
            .await?;
        tracing::info!("{} '{}': {} requested", self.role, name, action);

        let started = tokio::time::Instant::now();
        let mut next_report = self.progress_interval;
        client
            .await_ready_with_progress(
                name,
                property,
                SETTLED_STATES,
                Deadline::Within(self.timeout),
                |elapsed| {
                    if elapsed >= next_report {
                        tracing::info!(
                            "{} '{}': {} in progress ({}s elapsed)",
                            self.role,
                            name,
                            action,
                            elapsed.as_secs()
                        );
                        next_report = elapsed + self.progress_interval;
                    }
                },
            )
            .await?;

        tracing::info!(
            "{} '{}': {} complete after {:.1}s",
            self.role,
            name,
            action,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[async_trait]
impl Parkable for ParkSequencer {
    fn role(&self) -> &str {
        self.role
    }

    fn device(&self) -> &str {
        self.device.name()
    }

    async fn park(&self) -> IndiResult<()> {
        ParkSequencer::park(self).await
    }

    async fn unpark(&self) -> IndiResult<()> {
        ParkSequencer::unpark(self).await
    }

    async fn is_parked(&self) -> IndiResult<bool> {
        ParkSequencer::is_parked(self).await
    }
}
