//! Observatory state machine
//!
//! Each cycle reads the safety signals and decides whether the observatory
//! should be open. Rain and daylight close it at once; every other unsafe
//! condition must persist for `max_pending` consecutive cycles before the
//! roof moves, so a single noisy reading does not cycle the hardware.
//!
//! Closing parks the mount before the dome; opening unparks the dome before
//! the mount.
//!
//! When an INDI session drops, the next cycle reconnects it through a
//! [`Reconnect`] and swaps in the re-resolved devices before reading.

use crate::config::{ObservatoryConfig, OpenHysteresis, ParkFailurePolicy};
use crate::error::StartupError;
use crate::safety::{SafetyEvaluator, SafetyMonitor, SafetyReadings};
use crate::status::{CycleReport, StatusReporter};
use chrono::Utc;
use domeguard_indi::{IndiResult, Parkable};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where the observatory is in its open/close cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservatoryState {
    Closed,
    OpenPending,
    Open,
    ClosePending,
}

impl fmt::Display for ObservatoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservatoryState::Closed => write!(f, "Closed"),
            ObservatoryState::OpenPending => write!(f, "OpenPending"),
            ObservatoryState::Open => write!(f, "Open"),
            ObservatoryState::ClosePending => write!(f, "ClosePending"),
        }
    }
}

/// Timing and policy knobs of the state machine
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub max_pending: u32,
    pub cycle: Duration,
    pub cooldown: Duration,
    pub open_hysteresis: OpenHysteresis,
    pub park_failure: ParkFailurePolicy,
}

impl ControllerSettings {
    pub fn from_config(config: &ObservatoryConfig) -> Self {
        Self {
            max_pending: config.max_pending,
            cycle: config.cycle(),
            cooldown: config.cooldown(),
            open_hysteresis: config.open_hysteresis,
            park_failure: config.park_failure,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_pending: 10,
            cycle: Duration::from_secs(60),
            cooldown: Duration::from_secs(300),
            open_hysteresis: OpenHysteresis::Rearm,
            park_failure: ParkFailurePolicy::Commit,
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub state: ObservatoryState,
    pub pending_count: u32,
    pub readings: SafetyReadings,
    /// Wait before the next cycle
    pub delay: Duration,
}

/// Devices and sensors resolved on live sessions
pub struct Hardware {
    pub mount: Arc<dyn Parkable>,
    pub dome: Option<Arc<dyn Parkable>>,
    pub sensors: Box<dyn SafetyEvaluator>,
}

/// Owner of the INDI sessions behind a controller's [`Hardware`]
#[async_trait::async_trait]
pub trait Reconnect: Send {
    /// Addresses of sessions that are no longer connected
    fn dropped(&self) -> Vec<String>;

    /// Reopen dropped sessions and re-resolve every device
    async fn reconnect(&mut self) -> Result<Hardware, StartupError>;

    /// Disconnect every session
    async fn close(&mut self);
}

/// Drives the mount and dome from the safety readings
pub struct ObservatoryController {
    monitor: SafetyMonitor,
    mount: Arc<dyn Parkable>,
    dome: Option<Arc<dyn Parkable>>,
    settings: ControllerSettings,
    reporter: StatusReporter,
    link: Option<Box<dyn Reconnect>>,
    state: ObservatoryState,
    pending_count: u32,
}

impl ObservatoryController {
    pub fn new(
        monitor: SafetyMonitor,
        mount: Arc<dyn Parkable>,
        dome: Option<Arc<dyn Parkable>>,
        settings: ControllerSettings,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            monitor,
            mount,
            dome,
            settings,
            reporter,
            link: None,
            state: ObservatoryState::Closed,
            pending_count: 0,
        }
    }

    /// Recover dropped sessions through `link`, which is closed by
    /// [`shutdown`](Self::shutdown)
    pub fn with_reconnect(mut self, link: Box<dyn Reconnect>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn state(&self) -> ObservatoryState {
        self.state
    }

    pub fn pending_count(&self) -> u32 {
        self.pending_count
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&mut self, cancel: &CancellationToken) {
        tracing::info!(
            "Observatory controller started: cycle {:?}, cool-down {:?}, max_pending {}",
            self.settings.cycle,
            self.settings.cooldown,
            self.settings.max_pending
        );
        loop {
            let outcome = self.cycle().await;
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(outcome.delay) => {}
            }
        }
        tracing::info!("Observatory controller stopped in state {}", self.state);
    }

    /// Close the INDI sessions, if this controller owns them
    pub async fn shutdown(mut self) {
        if let Some(link) = self.link.as_mut() {
            link.close().await;
        }
    }

    /// Evaluate once, move hardware if needed, and report
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.restore_sessions().await;
        let readings = self.monitor.read().await;

        let delay = if readings.must_close() {
            self.close_now(&readings).await;
            self.settings.cooldown
        } else if readings.is_unsafe() {
            self.on_unsafe().await;
            self.settings.cycle
        } else {
            self.on_favorable().await;
            self.settings.cycle
        };

        self.reporter
            .report(&CycleReport {
                timestamp: Utc::now(),
                state: self.state,
                pending_count: self.pending_count,
                readings,
            })
            .await;

        CycleOutcome {
            state: self.state,
            pending_count: self.pending_count,
            readings,
            delay,
        }
    }

    /// Reconnect dropped sessions before the hardware is used. A failed
    /// reconnect leaves the stale devices in place; their errors go through
    /// the usual failure policies and the next cycle tries again.
    async fn restore_sessions(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let dropped = link.dropped();
        if dropped.is_empty() {
            return;
        }

        tracing::warn!("INDI session lost: {}", dropped.join(", "));
        match link.reconnect().await {
            Ok(hardware) => {
                tracing::info!("INDI sessions restored");
                self.mount = hardware.mount;
                self.dome = hardware.dome;
                self.monitor.replace_evaluator(hardware.sensors);
            }
            Err(e) => tracing::error!("Reconnect failed, retrying next cycle: {}", e),
        }
    }

    /// Rain or daylight: close without hysteresis
    async fn close_now(&mut self, readings: &SafetyReadings) {
        if self.state != ObservatoryState::Closed {
            tracing::warn!(
                "Closing immediately (raining: {}, daytime: {})",
                readings.raining,
                readings.daytime
            );
        }
        if let Err(e) = self.close().await {
            tracing::error!("Park failed while closing for rain/daylight: {}", e);
        }
        self.transition(ObservatoryState::Closed, 0);
    }

    async fn on_unsafe(&mut self) {
        match self.state {
            ObservatoryState::Closed => {
                // Already closed; park again in case something moved
                if let Err(e) = self.close().await {
                    tracing::warn!("Defensive park failed: {}", e);
                }
                self.pending_count = 0;
            }
            ObservatoryState::OpenPending => {
                // Never opened; abandon the open
                self.transition(ObservatoryState::Closed, 0);
                if let Err(e) = self.close().await {
                    tracing::warn!("Defensive park failed: {}", e);
                }
            }
            ObservatoryState::Open => self.transition(ObservatoryState::ClosePending, 1),
            ObservatoryState::ClosePending => {
                self.pending_count += 1;
                tracing::debug!(
                    "Still unsafe: {}/{} cycles",
                    self.pending_count,
                    self.settings.max_pending
                );
            }
        }

        if self.state == ObservatoryState::ClosePending && self.pending_count >= self.settings.max_pending {
            match self.close().await {
                Ok(()) => self.transition(ObservatoryState::Closed, 0),
                Err(e) => match self.settings.park_failure {
                    ParkFailurePolicy::Commit => {
                        tracing::error!("Park could not be confirmed, recording observatory as closed: {}", e);
                        self.transition(ObservatoryState::Closed, 0);
                    }
                    ParkFailurePolicy::Retry => {
                        tracing::error!("Park could not be confirmed, retrying next cycle: {}", e);
                        self.pending_count = self.settings.max_pending;
                    }
                },
            }
        }
    }

    async fn on_favorable(&mut self) {
        if self.state == ObservatoryState::Open {
            return;
        }

        let was_pending = self.state == ObservatoryState::OpenPending;
        let count = match (self.settings.open_hysteresis, was_pending) {
            (OpenHysteresis::Accumulate, true) => self.pending_count + 1,
            _ => 1,
        };
        self.transition(ObservatoryState::OpenPending, count);

        let ready = match self.settings.open_hysteresis {
            OpenHysteresis::Rearm => was_pending || self.settings.max_pending <= 1,
            OpenHysteresis::Accumulate => count >= self.settings.max_pending,
        };
        if !ready {
            return;
        }

        match self.open().await {
            Ok(()) => self.transition(ObservatoryState::Open, 0),
            Err(e) => {
                tracing::error!("Unpark failed, staying {}: {}", self.state, e);
                self.pending_count = 1;
            }
        }
    }

    fn transition(&mut self, to: ObservatoryState, pending_count: u32) {
        if self.state != to {
            tracing::info!("Observatory {} -> {}", self.state, to);
        }
        self.state = to;
        self.pending_count = pending_count;
    }

    /// Park the mount, then the dome. The dome is commanded even when the
    /// mount park fails; the first error is returned.
    async fn close(&self) -> IndiResult<()> {
        let mount = self.mount.park().await;
        if let Err(e) = &mount {
            tracing::error!("Mount park failed, closing dome anyway: {}", e);
        }
        let dome = match &self.dome {
            Some(dome) => dome.park().await.map_err(|e| {
                tracing::error!("Dome park failed: {}", e);
                e
            }),
            None => Ok(()),
        };
        mount.and(dome)
    }

    /// Unpark the dome, then the mount
    async fn open(&self) -> IndiResult<()> {
        if let Some(dome) = &self.dome {
            dome.unpark().await?;
        }
        self.mount.unpark().await
    }
}

/// Logs instead of moving hardware, for commissioning
pub struct DryRun {
    inner: Arc<dyn Parkable>,
}

impl DryRun {
    pub fn new(inner: Arc<dyn Parkable>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl Parkable for DryRun {
    fn role(&self) -> &str {
        self.inner.role()
    }

    fn device(&self) -> &str {
        self.inner.device()
    }

    async fn park(&self) -> IndiResult<()> {
        tracing::info!("[dry run] would park {} '{}'", self.role(), self.device());
        Ok(())
    }

    async fn unpark(&self) -> IndiResult<()> {
        tracing::info!("[dry run] would unpark {} '{}'", self.role(), self.device());
        Ok(())
    }

    async fn is_parked(&self) -> IndiResult<bool> {
        self.inner.is_parked().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domeguard_indi::IndiError;
    use crate::safety::testing::{ScriptedCycle, ScriptedEvaluator};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Records park/unpark calls in a shared log
    struct FakeDevice {
        role: &'static str,
        log: CallLog,
        fail_park: AtomicBool,
        fail_unpark: AtomicBool,
    }

    impl FakeDevice {
        fn new(role: &'static str, log: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                role,
                log: log.clone(),
                fail_park: AtomicBool::new(false),
                fail_unpark: AtomicBool::new(false),
            })
        }

        fn failure(&self, action: &'static str) -> IndiResult<()> {
            Err(IndiError::operation(
                self.role,
                action,
                IndiError::DeviceAlert {
                    device: self.role.to_string(),
                    property: "PARK".to_string(),
                    message: Some("motor stalled".to_string()),
                },
            ))
        }
    }

    #[async_trait::async_trait]
    impl Parkable for FakeDevice {
        fn role(&self) -> &str {
            self.role
        }

        fn device(&self) -> &str {
            self.role
        }

        async fn park(&self) -> IndiResult<()> {
            self.log.lock().unwrap().push(format!("park {}", self.role));
            if self.fail_park.load(Ordering::SeqCst) {
                return self.failure("park");
            }
            Ok(())
        }

        async fn unpark(&self) -> IndiResult<()> {
            self.log.lock().unwrap().push(format!("unpark {}", self.role));
            if self.fail_unpark.load(Ordering::SeqCst) {
                return self.failure("unpark");
            }
            Ok(())
        }

        async fn is_parked(&self) -> IndiResult<bool> {
            Ok(true)
        }
    }

    /// Session owner that stays dropped until a reconnect succeeds
    struct FakeLink {
        log: CallLog,
        down: bool,
        fail: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Reconnect for FakeLink {
        fn dropped(&self) -> Vec<String> {
            if self.down {
                vec!["127.0.0.1:7624".to_string()]
            } else {
                Vec::new()
            }
        }

        async fn reconnect(&mut self) -> Result<Hardware, StartupError> {
            self.log.lock().unwrap().push("reconnect".to_string());
            if self.fail.load(Ordering::SeqCst) {
                return Err(StartupError {
                    role: "mount",
                    device: "mount".to_string(),
                    address: "127.0.0.1:7624".to_string(),
                    source: IndiError::ConnectionFailed("connection refused".to_string()),
                });
            }
            self.down = false;
            Ok(Hardware {
                mount: FakeDevice::new("new mount", &self.log),
                dome: Some(FakeDevice::new("new dome", &self.log) as Arc<dyn Parkable>),
                sensors: Box::new(ScriptedEvaluator::new([raining()])),
            })
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().push("close".to_string());
        }
    }

    struct Rig {
        controller: ObservatoryController,
        mount: Arc<FakeDevice>,
        dome: Arc<FakeDevice>,
        log: CallLog,
    }

    impl Rig {
        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.log.lock().unwrap().clear();
        }

        /// Put the machine in a state without touching hardware
        fn force(&mut self, state: ObservatoryState, pending_count: u32) {
            self.controller.state = state;
            self.controller.pending_count = pending_count;
        }
    }

    fn rig(script: Vec<ScriptedCycle>, settings: ControllerSettings) -> Rig {
        let log: CallLog = Arc::default();
        let mount = FakeDevice::new("mount", &log);
        let dome = FakeDevice::new("dome", &log);
        let monitor = SafetyMonitor::new(Box::new(ScriptedEvaluator::new(script)));
        let controller = ObservatoryController::new(
            monitor,
            mount.clone(),
            Some(dome.clone() as Arc<dyn Parkable>),
            settings,
            StatusReporter::default(),
        );
        Rig {
            controller,
            mount,
            dome,
            log,
        }
    }

    fn clear() -> ScriptedCycle {
        ScriptedEvaluator::readings(SafetyReadings::default())
    }

    fn cloudy() -> ScriptedCycle {
        ScriptedEvaluator::readings(SafetyReadings {
            cloudy: true,
            ..Default::default()
        })
    }

    fn raining() -> ScriptedCycle {
        ScriptedEvaluator::readings(SafetyReadings {
            raining: true,
            ..Default::default()
        })
    }

    fn settings(max_pending: u32) -> ControllerSettings {
        ControllerSettings {
            max_pending,
            ..Default::default()
        }
    }

    fn park_both() -> Vec<String> {
        vec!["park mount".to_string(), "park dome".to_string()]
    }

    #[tokio::test]
    async fn test_closed_and_unsafe_reparks_every_cycle() {
        let mut rig = rig(vec![cloudy()], settings(10));
        for _ in 0..3 {
            let outcome = rig.controller.cycle().await;
            assert_eq!(outcome.state, ObservatoryState::Closed);
            assert_eq!(outcome.pending_count, 0);
            assert_eq!(outcome.delay, Duration::from_secs(60));
        }
        assert_eq!(rig.calls().len(), 6);
        assert!(rig.calls().chunks(2).all(|pair| pair == park_both().as_slice()));
    }

    #[tokio::test]
    async fn test_close_hysteresis() {
        let max_pending = 5;
        let mut rig = rig(vec![cloudy()], settings(max_pending));
        rig.force(ObservatoryState::Open, 0);

        for _ in 0..max_pending - 1 {
            rig.controller.cycle().await;
        }
        assert_eq!(rig.controller.state(), ObservatoryState::ClosePending);
        assert_eq!(rig.controller.pending_count(), max_pending - 1);
        assert!(rig.calls().is_empty());

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(outcome.pending_count, 0);
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_open_with_ten_unsafe_cycles_closes_once() {
        let mut rig = rig(vec![cloudy()], settings(10));
        rig.force(ObservatoryState::Open, 0);

        for _ in 0..10 {
            rig.controller.cycle().await;
        }
        assert_eq!(rig.controller.state(), ObservatoryState::Closed);
        assert_eq!(rig.controller.pending_count(), 0);
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_rain_overrides_any_state() {
        for (state, count) in [
            (ObservatoryState::Open, 0),
            (ObservatoryState::OpenPending, 1),
            (ObservatoryState::ClosePending, 7),
            (ObservatoryState::Closed, 0),
        ] {
            let mut rig = rig(vec![raining()], settings(10));
            rig.force(state, count);

            let outcome = rig.controller.cycle().await;
            assert_eq!(outcome.state, ObservatoryState::Closed, "from {}", state);
            assert_eq!(outcome.pending_count, 0);
            assert_eq!(outcome.delay, Duration::from_secs(300));
            assert_eq!(rig.calls(), park_both());
        }
    }

    #[tokio::test]
    async fn test_daylight_closes_and_waits_cooldown() {
        let day = ScriptedEvaluator::readings(SafetyReadings {
            daytime: true,
            ..Default::default()
        });
        let mut rig = rig(vec![day], settings(10));
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(outcome.delay, Duration::from_secs(300));
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_rain_park_failure_still_closed() {
        let mut rig = rig(vec![raining()], settings(10));
        rig.force(ObservatoryState::Open, 0);
        rig.mount.fail_park.store(true, Ordering::SeqCst);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        // The roof still closes over a mount that failed to park
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_hysteresis_close_parks_dome_after_mount_failure() {
        let mut rig = rig(
            vec![cloudy()],
            ControllerSettings {
                max_pending: 2,
                park_failure: ParkFailurePolicy::Retry,
                ..Default::default()
            },
        );
        rig.force(ObservatoryState::ClosePending, 1);
        rig.mount.fail_park.store(true, Ordering::SeqCst);

        let outcome = rig.controller.cycle().await;
        assert_eq!(rig.calls(), park_both());
        // The mount error still drives the failure policy
        assert_eq!(outcome.state, ObservatoryState::ClosePending);
    }

    #[tokio::test]
    async fn test_rearm_opens_on_second_favorable_cycle() {
        let mut rig = rig(vec![clear()], settings(10));

        let first = rig.controller.cycle().await;
        assert_eq!(first.state, ObservatoryState::OpenPending);
        assert_eq!(first.pending_count, 1);
        assert!(rig.calls().is_empty());

        let second = rig.controller.cycle().await;
        assert_eq!(second.state, ObservatoryState::Open);
        assert_eq!(second.pending_count, 0);
        assert_eq!(
            rig.calls(),
            vec!["unpark dome".to_string(), "unpark mount".to_string()]
        );

        rig.clear();
        let third = rig.controller.cycle().await;
        assert_eq!(third.state, ObservatoryState::Open);
        assert!(rig.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rearm_opens_immediately_with_single_pending() {
        let mut rig = rig(vec![clear()], settings(1));
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Open);
        assert_eq!(rig.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_accumulate_opens_at_max_pending() {
        let mut rig = rig(
            vec![clear()],
            ControllerSettings {
                max_pending: 3,
                open_hysteresis: OpenHysteresis::Accumulate,
                ..Default::default()
            },
        );

        assert_eq!(rig.controller.cycle().await.pending_count, 1);
        let second = rig.controller.cycle().await;
        assert_eq!(second.state, ObservatoryState::OpenPending);
        assert_eq!(second.pending_count, 2);
        assert!(rig.calls().is_empty());

        let third = rig.controller.cycle().await;
        assert_eq!(third.state, ObservatoryState::Open);
        assert_eq!(third.pending_count, 0);
    }

    #[tokio::test]
    async fn test_unsafe_while_open_pending_returns_to_closed() {
        let mut rig = rig(vec![clear(), cloudy()], settings(10));
        rig.controller.cycle().await;
        assert_eq!(rig.controller.state(), ObservatoryState::OpenPending);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(outcome.pending_count, 0);
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_favorable_interrupts_close_pending() {
        let mut rig = rig(vec![cloudy(), cloudy(), clear()], settings(10));
        rig.force(ObservatoryState::Open, 0);
        rig.controller.cycle().await;
        rig.controller.cycle().await;
        assert_eq!(rig.controller.pending_count(), 2);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::OpenPending);
        assert_eq!(outcome.pending_count, 1);
        assert!(rig.calls().is_empty());
    }

    #[tokio::test]
    async fn test_park_failure_commit_records_closed() {
        let mut rig = rig(vec![cloudy()], settings(2));
        rig.force(ObservatoryState::ClosePending, 1);
        rig.dome.fail_park.store(true, Ordering::SeqCst);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(outcome.pending_count, 0);
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_park_failure_retry_stays_pending() {
        let mut rig = rig(
            vec![cloudy()],
            ControllerSettings {
                max_pending: 2,
                park_failure: ParkFailurePolicy::Retry,
                ..Default::default()
            },
        );
        rig.force(ObservatoryState::ClosePending, 1);
        rig.mount.fail_park.store(true, Ordering::SeqCst);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::ClosePending);
        assert_eq!(outcome.pending_count, 2);

        rig.mount.fail_park.store(false, Ordering::SeqCst);
        rig.clear();
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(rig.calls(), park_both());
    }

    #[tokio::test]
    async fn test_unpark_failure_stays_open_pending() {
        let mut rig = rig(vec![clear()], settings(1));
        rig.dome.fail_unpark.store(true, Ordering::SeqCst);

        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::OpenPending);
        assert_eq!(outcome.pending_count, 1);
        // Mount stays parked when the dome did not open
        assert_eq!(rig.calls(), vec!["unpark dome".to_string()]);
    }

    #[tokio::test]
    async fn test_sensor_failures_use_policies() {
        // Every read fails: raining and daytime assumed, so close
        let mut rig = rig(vec![[None; 6]], settings(10));
        rig.force(ObservatoryState::Open, 0);
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert!(outcome.readings.raining);
        assert_eq!(outcome.delay, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_mount_only_site() {
        let log: CallLog = Arc::default();
        let mount = FakeDevice::new("mount", &log);
        let monitor = SafetyMonitor::new(Box::new(ScriptedEvaluator::new([raining()])));
        let mut controller =
            ObservatoryController::new(monitor, mount, None, settings(10), StatusReporter::default());
        controller.cycle().await;
        assert_eq!(*log.lock().unwrap(), vec!["park mount".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_never_moves_hardware() {
        let log: CallLog = Arc::default();
        let mount = DryRun::new(FakeDevice::new("mount", &log));
        assert_eq!(mount.role(), "mount");
        mount.park().await.unwrap();
        mount.unpark().await.unwrap();
        assert!(mount.is_parked().await.unwrap());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_is_restored_before_reading() {
        let mut rig = rig(vec![clear()], settings(10));
        let log = rig.log.clone();
        let fail = Arc::new(AtomicBool::new(true));
        rig.controller = rig.controller.with_reconnect(Box::new(FakeLink {
            log: log.clone(),
            down: true,
            fail: fail.clone(),
        }));

        // Server still down: old devices and sensors stay in place
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::OpenPending);
        assert_eq!(rig.calls(), vec!["reconnect".to_string()]);

        // Back up: the new sensors report rain and the new devices park
        fail.store(false, Ordering::SeqCst);
        rig.clear();
        let outcome = rig.controller.cycle().await;
        assert_eq!(outcome.state, ObservatoryState::Closed);
        assert_eq!(
            rig.calls(),
            vec![
                "reconnect".to_string(),
                "park new mount".to_string(),
                "park new dome".to_string()
            ]
        );

        // Healthy sessions are left alone
        rig.clear();
        rig.controller.cycle().await;
        assert_eq!(rig.calls(), vec!["park new mount".to_string(), "park new dome".to_string()]);

        rig.clear();
        rig.controller.shutdown().await;
        assert_eq!(*log.lock().unwrap(), vec!["close".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut rig = rig(vec![clear()], settings(10));
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), rig.controller.run(&cancel))
            .await
            .unwrap();
        assert_eq!(rig.controller.state(), ObservatoryState::OpenPending);
    }
}
