//! Device discovery and connection
//!
//! A [`DeviceHandle`] is a resolved reference to one named device behind an
//! [`IndiClient`] session. It caches which controls it has already found so
//! later lookups do not wait again.

use crate::client::{Deadline, IndiClient, SETTLED_STATES};
use crate::error::{IndiError, IndiResult};
use crate::protocol::standard_properties::{CONNECT, CONNECTION, DISCONNECT};
use crate::{IndiProperty, PropertyKind};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Handle to one device on an INDI session
#[derive(Debug)]
pub struct DeviceHandle {
    client: IndiClient,
    name: String,
    controls: RwLock<HashMap<String, PropertyKind>>,
}

impl DeviceHandle {
    /// Wait for `device` to be defined by the server.
    ///
    /// Checks up to `max_attempts` times with `poll_interval` between checks.
    pub async fn resolve(
        client: &IndiClient,
        device: &str,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> IndiResult<Self> {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            client.check_session()?;
            if client.has_device(device).await {
                tracing::info!(
                    "Found INDI device '{}' on {} (attempt {}/{}, {} properties)",
                    device,
                    client.endpoint(),
                    attempt,
                    attempts,
                    client.properties(device).await.len()
                );
                return Ok(Self {
                    client: client.clone(),
                    name: device.to_string(),
                    controls: RwLock::new(HashMap::new()),
                });
            }
            if attempt < attempts {
                tracing::debug!(
                    "INDI device '{}' not defined yet (attempt {}/{}), retrying in {:?}",
                    device,
                    attempt,
                    attempts,
                    poll_interval
                );
                // Drivers started after the session opened only answer a fresh request
                client.request_device(device).await?;
                client.pause(poll_interval).await?;
            }
        }

        let known = client.devices().await;
        tracing::error!(
            "INDI device '{}' not found on {}; server defines: {:?}",
            device,
            client.endpoint(),
            known
        );
        Err(IndiError::DeviceNotFound {
            device: device.to_string(),
            attempts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &IndiClient {
        &self.client
    }

    /// True when the session is up and the driver reports CONNECT on
    pub async fn is_connected(&self) -> bool {
        if !self.client.is_connected() {
            return false;
        }
        self.client
            .property(&self.name, CONNECTION)
            .await
            .and_then(|p| p.switch(CONNECT))
            .unwrap_or(false)
    }

    /// Connect the driver to its hardware if it is not already.
    ///
    /// Single attempt: switch CONNECT on, wait for CONNECTION to settle,
    /// then verify CONNECT reads on.
    pub async fn ensure_connected(&self) -> IndiResult<()> {
        self.client.check_session()?;
        if self.is_connected().await {
            return Ok(());
        }

        let deadline = Deadline::Within(self.client.timeout_config().control_timeout());
        tracing::info!("Connecting INDI device '{}'", self.name);
        self.client
            .set_switch(&self.name, CONNECTION, &[CONNECT], &[DISCONNECT], deadline)
            .await?;
        self.client
            .await_ready(&self.name, CONNECTION, SETTLED_STATES, deadline)
            .await
            .map_err(|e| match e {
                IndiError::Cancelled | IndiError::NotConnected => e,
                other => IndiError::ConnectionFailed(format!(
                    "device '{}' did not connect: {}",
                    self.name, other
                )),
            })?;

        if self.is_connected().await {
            tracing::info!("INDI device '{}' connected", self.name);
            Ok(())
        } else {
            Err(IndiError::ConnectionFailed(format!(
                "device '{}' settled with CONNECT off",
                self.name
            )))
        }
    }

    /// Look up a control, waiting for it only the first time
    pub async fn control(&self, name: &str, kind: PropertyKind) -> IndiResult<IndiProperty> {
        let cached = self.controls.read().await.get(name).copied();
        let deadline = match cached {
            Some(_) => Deadline::Immediate,
            None => Deadline::Within(self.client.timeout_config().control_timeout()),
        };

        match self.client.get_control(&self.name, name, kind, deadline).await {
            Ok(prop) => {
                if cached.is_none() {
                    self.controls.write().await.insert(name.to_string(), kind);
                }
                Ok(prop)
            }
            Err(e) => {
                if matches!(e, IndiError::PropertyNotFound { .. }) {
                    // Deleted since it was cached; the next lookup waits again
                    self.controls.write().await.remove(name);
                }
                Err(e)
            }
        }
    }
}
