//! Startup wiring and session recovery
//!
//! Opens one INDI session per server address (mount and dome share a session
//! when they live on the same server), resolves and connects each device, and
//! assembles the controller from the configuration. The sessions stay with a
//! [`SessionLink`], which reopens them and re-resolves the devices after a
//! server restart.

use crate::config::{EndpointConfig, ObservatoryConfig};
use crate::controller::{ControllerSettings, DryRun, Hardware, ObservatoryController, Reconnect};
use crate::error::StartupError;
use crate::safety::{SafetyMonitor, SiteSensors, WeatherStation};
use crate::status::StatusReporter;
use domeguard_indi::{DeviceHandle, IndiClient, IndiDome, IndiError, IndiMount, Parkable};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the controller needs, built once at startup
pub struct ObservatoryContext {
    link: SessionLink,
    hardware: Hardware,
    settings: ControllerSettings,
    reporter: StatusReporter,
}

impl ObservatoryContext {
    /// Connect to every configured device. Any failure is fatal.
    ///
    /// With `dry_run` the mount and dome are wrapped so park/unpark only log.
    pub async fn build(
        config: &ObservatoryConfig,
        cancel: &CancellationToken,
        dry_run: bool,
    ) -> Result<Self, StartupError> {
        let mut link = SessionLink {
            config: config.clone(),
            cancel: cancel.clone(),
            dry_run,
            sessions: HashMap::new(),
        };
        let hardware = link.resolve_all().await?;
        if dry_run {
            tracing::warn!("Dry run: park and unpark requests will only be logged");
        }

        Ok(Self {
            link,
            hardware,
            settings: ControllerSettings::from_config(config),
            reporter: StatusReporter::new(config.status_file.clone()),
        })
    }

    /// Number of open INDI sessions
    pub fn session_count(&self) -> usize {
        self.link.sessions.len()
    }

    pub fn mount(&self) -> &Arc<dyn Parkable> {
        &self.hardware.mount
    }

    pub fn dome(&self) -> Option<&Arc<dyn Parkable>> {
        self.hardware.dome.as_ref()
    }

    /// Hand the sensors, hardware and sessions to a controller.
    ///
    /// The sessions stay open until [`ObservatoryController::shutdown`].
    pub fn into_controller(self) -> ObservatoryController {
        let monitor = SafetyMonitor::new(self.hardware.sensors);
        ObservatoryController::new(
            monitor,
            self.hardware.mount,
            self.hardware.dome,
            self.settings,
            self.reporter,
        )
        .with_reconnect(Box::new(self.link))
    }
}

/// The INDI sessions of one observatory, keyed by server address
pub struct SessionLink {
    config: ObservatoryConfig,
    cancel: CancellationToken,
    dry_run: bool,
    sessions: HashMap<String, IndiClient>,
}

impl SessionLink {
    /// Resolve every configured device, opening sessions that are missing
    async fn resolve_all(&mut self) -> Result<Hardware, StartupError> {
        let config = self.config.clone();
        let park_timeout = config.timeouts.park_timeout();

        let device = self.device("mount", &config.mount).await?;
        let mut mount: Arc<dyn Parkable> = Arc::new(IndiMount::new(device).with_timeout(park_timeout));

        let mut dome: Option<Arc<dyn Parkable>> = match config.enclosure() {
            Some(endpoint) => {
                let device = self.device("dome", endpoint).await?;
                Some(Arc::new(IndiDome::new(device).with_timeout(park_timeout)))
            }
            None => None,
        };

        let weather = match &config.weather {
            Some(endpoint) => {
                let device = self.device("weather", endpoint).await?;
                Some(WeatherStation::new(device, &config.thresholds))
            }
            None => None,
        };

        if self.dry_run {
            mount = Arc::new(DryRun::new(mount));
            dome = dome.map(|d| Arc::new(DryRun::new(d)) as Arc<dyn Parkable>);
        }

        let sensors = SiteSensors::new(&config.site, &config.thresholds, &config.files, weather);
        sensors.log_sources();

        Ok(Hardware {
            mount,
            dome,
            sensors: Box::new(sensors),
        })
    }

    /// Resolve one device, opening a session for its server if needed
    async fn device(&mut self, role: &'static str, endpoint: &EndpointConfig) -> Result<DeviceHandle, StartupError> {
        let address = endpoint.address();
        let startup_error = |source: IndiError| StartupError {
            role,
            device: endpoint.device.clone(),
            address: address.clone(),
            source,
        };

        let client = match self.sessions.get(&address) {
            Some(client) => client.clone(),
            None => {
                let client = IndiClient::connect_with(
                    &endpoint.host,
                    endpoint.port,
                    self.config.timeouts.clone(),
                    &self.cancel,
                )
                .await
                .map_err(startup_error)?;
                self.sessions.insert(address.clone(), client.clone());
                client
            }
        };

        let device = DeviceHandle::resolve(
            &client,
            &endpoint.device,
            self.config.discovery.attempts,
            self.config.discovery.interval(),
        )
        .await
        .map_err(startup_error)?;
        device.ensure_connected().await.map_err(startup_error)?;
        tracing::info!("{} ready: '{}' on {}", role, endpoint.device, address);
        Ok(device)
    }

    /// Forget sessions that have dropped so the next resolve reopens them
    async fn discard_dropped(&mut self) {
        let dropped: Vec<String> = self.dropped();
        for address in dropped {
            if let Some(client) = self.sessions.remove(&address) {
                client.disconnect().await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Reconnect for SessionLink {
    fn dropped(&self) -> Vec<String> {
        let mut dropped: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, client)| !client.is_connected())
            .map(|(address, _)| address.clone())
            .collect();
        dropped.sort();
        dropped
    }

    /// Up to `reconnect.attempts` rounds of reopening and resolving, with
    /// `reconnect.interval_ms` between rounds
    async fn reconnect(&mut self) -> Result<Hardware, StartupError> {
        let attempts = self.config.reconnect.attempts.max(1);
        let interval = self.config.reconnect.interval();
        let mut attempt = 1;
        loop {
            self.discard_dropped().await;
            let err = match self.resolve_all().await {
                Ok(hardware) => {
                    tracing::info!("Reconnected INDI devices (attempt {}/{})", attempt, attempts);
                    return Ok(hardware);
                }
                Err(e) => e,
            };
            if attempt >= attempts || err.source.is_cancelled() {
                return Err(err);
            }
            tracing::warn!(
                "Reconnect attempt {}/{} failed, retrying in {:?}: {}",
                attempt,
                attempts,
                interval,
                err
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(interval) => {}
            }
            attempt += 1;
        }
    }

    async fn close(&mut self) {
        close_sessions(self.sessions.drain().map(|(_, client)| client).collect()).await;
    }
}

/// Disconnect every session
async fn close_sessions(sessions: Vec<IndiClient>) {
    for client in sessions {
        tracing::debug!("Closing INDI session {}", client.endpoint());
        client.disconnect().await;
    }
}
