//! INDI client implementation
//!
//! This module provides the session to one INDI server:
//! - Writer task sending one command per line
//! - Reader task feeding the shared property store
//! - Cancellable polling for property discovery and state settling
//! - Alert detection with a single settle re-check
//! - Permission and limit checks before writes
//! - Exclusive switch rules applied to the outgoing vector

use crate::error::{IndiError, IndiResult};
use crate::protocol::{self, MessageBuilder};
use crate::store::PropertyStore;
use crate::{IndiProperty, IndiTimeoutConfig, PropertyKind, PropertyState, Value};
use quick_xml::events::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// INDI client event
#[derive(Debug, Clone, PartialEq)]
pub enum IndiEvent {
    /// First property of a device was defined
    DeviceDefined(String),
    /// Property defined (or redefined)
    PropertyDefined {
        device: String,
        name: String,
        kind: PropertyKind,
    },
    /// Property state and/or values updated
    PropertyUpdated {
        device: String,
        name: String,
        state: PropertyState,
    },
    /// Property deleted
    PropertyDeleted { device: String, name: String },
    /// Device and all its properties deleted
    DeviceDeleted(String),
    /// Message from a device or the server
    Message {
        device: Option<String>,
        text: String,
    },
    /// Connection state changed
    ConnectionStateChanged(bool),
}

/// How long a polling operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Poll until the session is cancelled
    Forever,
    /// Check once
    Immediate,
    /// Poll until the duration has elapsed
    Within(Duration),
}

impl From<Duration> for Deadline {
    /// A zero duration means "no timeout"
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Deadline::Forever
        } else {
            Deadline::Within(d)
        }
    }
}

impl Deadline {
    fn expired(self, elapsed: Duration) -> bool {
        match self {
            Deadline::Forever => false,
            Deadline::Immediate => true,
            Deadline::Within(limit) => elapsed >= limit,
        }
    }

    fn budget(self) -> Duration {
        match self {
            Deadline::Within(limit) => limit,
            Deadline::Forever | Deadline::Immediate => Duration::ZERO,
        }
    }
}

/// Result of one readiness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// State is one of the acceptable states
    Ready,
    /// Present but not yet acceptable
    Busy,
    /// Device reports Alert
    Alert,
    /// Property not defined (yet)
    Missing,
}

impl Readiness {
    fn of(prop: Option<&IndiProperty>, acceptable: &[PropertyState]) -> Self {
        match prop {
            None => Readiness::Missing,
            Some(p) if acceptable.contains(&p.state) => Readiness::Ready,
            Some(p) if p.state == PropertyState::Alert => Readiness::Alert,
            Some(_) => Readiness::Busy,
        }
    }
}

/// States `await_ready` accepts by default
pub const SETTLED_STATES: &[PropertyState] = &[PropertyState::Ok, PropertyState::Idle];

/// INDI client session
///
/// Cheap to clone; all clones share one connection and one property cache.
#[derive(Clone)]
pub struct IndiClient {
    endpoint: String,
    tx: mpsc::Sender<String>,
    store: Arc<RwLock<PropertyStore>>,
    connected: Arc<AtomicBool>,
    event_tx: broadcast::Sender<IndiEvent>,
    cancel: CancellationToken,
    config: IndiTimeoutConfig,
}

impl std::fmt::Debug for IndiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndiClient")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl IndiClient {
    /// Connect to an INDI server with default timeouts
    pub async fn connect(host: &str, port: u16) -> IndiResult<Self> {
        Self::connect_with(host, port, IndiTimeoutConfig::default(), &CancellationToken::new()).await
    }

    /// Connect to an INDI server; the session is cancelled with `parent`
    pub async fn connect_with(
        host: &str,
        port: u16,
        config: IndiTimeoutConfig,
        parent: &CancellationToken,
    ) -> IndiResult<Self> {
        let addr = format!("{}:{}", host, port);
        let connection_timeout = config.connection_timeout();

        let stream = match timeout(connection_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IndiError::ConnectionFailed(format!(
                    "Failed to connect to INDI server at {}: {}. Check that the server is running and the address is correct.",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(IndiError::ConnectionTimeout {
                    host: host.to_string(),
                    port,
                    duration: connection_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY on {}: {}", addr, e);
        }

        tracing::info!("Connected to INDI server {}", addr);
        let (read_half, write_half) = stream.into_split();
        Self::start(addr, read_half, write_half, config, parent).await
    }

    /// Attach to an already-open byte stream speaking INDI
    pub async fn from_stream<S>(
        stream: S,
        config: IndiTimeoutConfig,
        parent: &CancellationToken,
    ) -> IndiResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::start("stream".to_string(), read_half, write_half, config, parent).await
    }

    async fn start<R, W>(
        endpoint: String,
        reader: R,
        writer: W,
        config: IndiTimeoutConfig,
        parent: &CancellationToken,
    ) -> IndiResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(100);
        let (event_tx, _) = broadcast::channel(256);
        let client = Self {
            endpoint,
            tx,
            store: Arc::new(RwLock::new(PropertyStore::new())),
            connected: Arc::new(AtomicBool::new(true)),
            event_tx,
            cancel: parent.child_token(),
            config,
        };

        tokio::spawn(Self::writer_task(writer, rx, client.cancel.clone()));
        tokio::spawn(Self::reader_task(
            reader,
            client.endpoint.clone(),
            client.store.clone(),
            client.connected.clone(),
            client.event_tx.clone(),
            client.cancel.clone(),
        ));

        let _ = client.event_tx.send(IndiEvent::ConnectionStateChanged(true));
        client.send_command(&protocol::get_properties_xml(None)).await?;
        Ok(client)
    }

    /// Writer task - sends commands to INDI server
    async fn writer_task<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut rx: mpsc::Receiver<String>,
        cancel: CancellationToken,
    ) {
        loop {
            let cmd = tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            tracing::trace!("INDI -> {}", cmd);
            if let Err(e) = writer.write_all(cmd.as_bytes()).await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::error!("INDI flush error: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Reader task - parses server traffic into the property store
    async fn reader_task<R: AsyncRead + Unpin>(
        reader: R,
        endpoint: String,
        store: Arc<RwLock<PropertyStore>>,
        connected: Arc<AtomicBool>,
        event_tx: broadcast::Sender<IndiEvent>,
        cancel: CancellationToken,
    ) {
        let mut reader = quick_xml::reader::Reader::from_reader(tokio::io::BufReader::new(reader));
        reader.trim_text(true);
        reader.check_end_names(false);

        let mut buf = Vec::new();
        let mut builder = MessageBuilder::new();

        loop {
            let message = {
                let read = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = reader.read_event_into_async(&mut buf) => read,
                };
                match read {
                    Ok(Event::Eof) => {
                        tracing::info!("INDI connection to {} closed (EOF)", endpoint);
                        break;
                    }
                    Ok(event) => match builder.feed(&event) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!("Discarding malformed INDI message from {}: {}", endpoint, e);
                            builder = MessageBuilder::new();
                            None
                        }
                    },
                    Err(quick_xml::Error::Io(e)) => {
                        tracing::error!("INDI read error from {}: {}", endpoint, e);
                        break;
                    }
                    Err(e) => {
                        tracing::error!(
                            "INDI XML parse error: {}. Raw buffer (first 200 chars): {:?}",
                            e,
                            String::from_utf8_lossy(&buf[..buf.len().min(200)])
                        );
                        builder = MessageBuilder::new();
                        None
                    }
                }
            };
            buf.clear();

            if let Some(message) = message {
                let events = store.write().await.apply(message);
                for event in events {
                    if let IndiEvent::Message { device, text } = &event {
                        tracing::info!("[{}] {}", device.as_deref().unwrap_or("server"), text);
                    }
                    let _ = event_tx.send(event);
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        let _ = event_tx.send(IndiEvent::ConnectionStateChanged(false));
    }

    /// Close the session: stops both tasks and clears the cache
    pub async fn disconnect(&self) {
        tracing::info!("Disconnecting from INDI server {}", self.endpoint);
        self.cancel.cancel();
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.event_tx.send(IndiEvent::ConnectionStateChanged(false));
        }
        self.store.write().await.clear();
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout_config(&self) -> &IndiTimeoutConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.event_tx.subscribe()
    }

    /// Sleep unless the session is cancelled first
    pub async fn pause(&self, duration: Duration) -> IndiResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(IndiError::Cancelled),
            _ = sleep(duration) => Ok(()),
        }
    }

    pub(crate) fn check_session(&self) -> IndiResult<()> {
        if self.cancel.is_cancelled() {
            Err(IndiError::Cancelled)
        } else if !self.connected.load(Ordering::SeqCst) {
            Err(IndiError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Send a raw command to the server
    pub async fn send_command(&self, command: &str) -> IndiResult<()> {
        self.check_session()?;
        self.tx
            .send(command.to_string())
            .await
            .map_err(|_| IndiError::ChannelClosed("INDI writer task has stopped".to_string()))
    }

    /// Ask the server to (re)send definitions for one device
    pub async fn request_device(&self, device: &str) -> IndiResult<()> {
        self.send_command(&protocol::get_properties_xml(Some(device)))
            .await
    }

    pub async fn devices(&self) -> Vec<String> {
        self.store.read().await.devices()
    }

    pub async fn has_device(&self, device: &str) -> bool {
        self.store.read().await.has_device(device)
    }

    /// Snapshot of one property, if defined
    pub async fn property(&self, device: &str, name: &str) -> Option<IndiProperty> {
        self.store.read().await.get(device, name).cloned()
    }

    /// Snapshot of every property of a device
    pub async fn properties(&self, device: &str) -> Vec<IndiProperty> {
        self.store.read().await.properties_of(device)
    }

    /// Wait for a property to be defined and check its kind
    pub async fn get_control(
        &self,
        device: &str,
        name: &str,
        kind: PropertyKind,
        deadline: Deadline,
    ) -> IndiResult<IndiProperty> {
        let start = Instant::now();
        loop {
            self.check_session()?;

            if let Some(prop) = self.property(device, name).await {
                if prop.kind != kind {
                    return Err(IndiError::WrongKind {
                        device: device.to_string(),
                        property: name.to_string(),
                        expected: kind,
                        actual: prop.kind,
                    });
                }
                return Ok(prop);
            }

            if deadline == Deadline::Immediate {
                return Err(IndiError::PropertyNotFound {
                    device: device.to_string(),
                    property: name.to_string(),
                });
            }
            if deadline.expired(start.elapsed()) {
                return Err(IndiError::PropertyTimeout {
                    device: device.to_string(),
                    property: name.to_string(),
                    duration: deadline.budget(),
                    last_state: None,
                });
            }

            self.pause(self.config.control_poll_interval()).await?;
        }
    }

    /// Check property permission before write
    fn check_write_permission(prop: &IndiProperty) -> IndiResult<()> {
        if prop.perm.is_writable() {
            Ok(())
        } else {
            Err(IndiError::PermissionDenied {
                device: prop.device.clone(),
                property: prop.name.clone(),
            })
        }
    }

    /// Record the vector in the cache as Busy, then send it.
    ///
    /// The store lock is held across the send so the reader task cannot
    /// apply the device's reply before the optimistic Busy.
    async fn commit(&self, prop: &IndiProperty, values: Vec<(String, Value)>) -> IndiResult<IndiProperty> {
        let cmd = protocol::new_vector_xml(prop.kind, &prop.device, &prop.name, &values);

        let mut store = self.store.write().await;
        let Some(cached) = store.get_mut(&prop.device, &prop.name) else {
            // Deleted since get_control returned it
            self.send_command(&cmd).await?;
            let mut sent = prop.clone();
            apply_values(&mut sent, values);
            sent.state = PropertyState::Busy;
            return Ok(sent);
        };
        let previous = cached.clone();
        apply_values(cached, values);
        cached.state = PropertyState::Busy;
        let committed = cached.clone();

        if let Err(e) = self.send_command(&cmd).await {
            if let Some(cached) = store.get_mut(&prop.device, &prop.name) {
                *cached = previous;
            }
            return Err(e);
        }
        Ok(committed)
    }

    /// Set switch elements on/off, honoring the property's switch rule
    pub async fn set_switch(
        &self,
        device: &str,
        name: &str,
        on: &[&str],
        off: &[&str],
        deadline: Deadline,
    ) -> IndiResult<IndiProperty> {
        let prop = self
            .get_control(device, name, PropertyKind::Switch, deadline)
            .await?;
        Self::check_write_permission(&prop)?;

        let values = switch_values(&prop, on, off);
        tracing::debug!(
            "Setting {}.{}: on={:?} off={:?}",
            device,
            name,
            on,
            off
        );
        self.commit(&prop, values).await
    }

    /// Set number elements with permission and limits check
    pub async fn set_number(
        &self,
        device: &str,
        name: &str,
        values: &[(&str, f64)],
        deadline: Deadline,
    ) -> IndiResult<IndiProperty> {
        let prop = self
            .get_control(device, name, PropertyKind::Number, deadline)
            .await?;
        Self::check_write_permission(&prop)?;

        for (element, value) in values {
            let Some(limits) = prop.element(element).and_then(|e| e.limits.as_ref()) else {
                continue;
            };
            if let (Some(min), Some(max)) = (limits.min, limits.max) {
                if min < max && (*value < min || *value > max) {
                    return Err(IndiError::ValueOutOfRange {
                        device: device.to_string(),
                        property: name.to_string(),
                        element: element.to_string(),
                        value: *value,
                        min,
                        max,
                    });
                }
            }
        }

        let requested: HashMap<&str, f64> = values.iter().copied().collect();
        let full = prop
            .elements
            .iter()
            .map(|e| {
                let value = requested
                    .get(e.name.as_str())
                    .map(|v| Value::Number(*v))
                    .unwrap_or_else(|| e.value.clone());
                (e.name.clone(), value)
            })
            .collect();
        self.commit(&prop, full).await
    }

    /// Set text elements with permission check
    pub async fn set_text(
        &self,
        device: &str,
        name: &str,
        values: &[(&str, &str)],
        deadline: Deadline,
    ) -> IndiResult<IndiProperty> {
        let prop = self
            .get_control(device, name, PropertyKind::Text, deadline)
            .await?;
        Self::check_write_permission(&prop)?;

        let requested: HashMap<&str, &str> = values.iter().copied().collect();
        let full = prop
            .elements
            .iter()
            .map(|e| {
                let value = requested
                    .get(e.name.as_str())
                    .map(|v| Value::Text(v.to_string()))
                    .unwrap_or_else(|| e.value.clone());
                (e.name.clone(), value)
            })
            .collect();
        self.commit(&prop, full).await
    }

    /// Single readiness check against the cached state
    pub async fn readiness(&self, device: &str, name: &str, acceptable: &[PropertyState]) -> Readiness {
        let store = self.store.read().await;
        Readiness::of(store.get(device, name), acceptable)
    }

    /// Wait for a property to reach one of the acceptable states
    pub async fn await_ready(
        &self,
        device: &str,
        name: &str,
        acceptable: &[PropertyState],
        deadline: Deadline,
    ) -> IndiResult<()> {
        self.await_ready_with_progress(device, name, acceptable, deadline, |_| {})
            .await
    }

    /// Like [`await_ready`](Self::await_ready), calling `on_busy` with the
    /// elapsed time on every poll that finds the property not yet settled
    pub async fn await_ready_with_progress<F>(
        &self,
        device: &str,
        name: &str,
        acceptable: &[PropertyState],
        deadline: Deadline,
        mut on_busy: F,
    ) -> IndiResult<()>
    where
        F: FnMut(Duration),
    {
        let start = Instant::now();
        let mut last_state = None;

        loop {
            self.check_session()?;

            let prop = self.property(device, name).await;
            if let Some(p) = &prop {
                last_state = Some(p.state);
            }
            match Readiness::of(prop.as_ref(), acceptable) {
                Readiness::Ready => return Ok(()),
                Readiness::Alert => {
                    tracing::debug!(
                        "{}.{} reported Alert, re-checking after {:?}",
                        device,
                        name,
                        self.config.alert_settle()
                    );
                    self.pause(self.config.alert_settle()).await?;
                    let settled = self.property(device, name).await;
                    if Readiness::of(settled.as_ref(), acceptable) == Readiness::Ready {
                        return Ok(());
                    }
                    return Err(IndiError::DeviceAlert {
                        device: device.to_string(),
                        property: name.to_string(),
                        message: settled.and_then(|p| p.message),
                    });
                }
                Readiness::Busy => on_busy(start.elapsed()),
                Readiness::Missing => {}
            }

            if deadline.expired(start.elapsed()) {
                return Err(IndiError::PropertyTimeout {
                    device: device.to_string(),
                    property: name.to_string(),
                    duration: deadline.budget(),
                    last_state,
                });
            }

            self.pause(self.config.state_poll_interval()).await?;
        }
    }

    /// Immediate snapshot of a property's element values
    pub async fn read_values(
        &self,
        device: &str,
        name: &str,
        kind: PropertyKind,
    ) -> IndiResult<HashMap<String, Value>> {
        self.check_session()?;
        let prop = self
            .get_control(device, name, kind, Deadline::Immediate)
            .await?;
        Ok(prop
            .elements
            .into_iter()
            .map(|e| (e.name, e.value))
            .collect())
    }
}

/// Compute the full outgoing switch vector.
///
/// Exclusive rules honor only the first requested on-element that exists and
/// force every other element off. Without an on-element (or for
/// `AnyOfMany`) listed elements are set and the rest keep their values.
pub(crate) fn switch_values(prop: &IndiProperty, on: &[&str], off: &[&str]) -> Vec<(String, Value)> {
    let exclusive = prop.rule.map(|r| r.is_exclusive()).unwrap_or(false);
    let first_on = on.iter().find(|n| prop.element(n).is_some()).copied();

    prop.elements
        .iter()
        .map(|e| {
            let name = e.name.as_str();
            let value = match (exclusive, first_on) {
                (true, Some(chosen)) => name == chosen,
                _ => {
                    if on.contains(&name) {
                        true
                    } else if off.contains(&name) {
                        false
                    } else {
                        e.value.as_switch().unwrap_or(false)
                    }
                }
            };
            (e.name.clone(), Value::Switch(value))
        })
        .collect()
}

fn apply_values(prop: &mut IndiProperty, values: Vec<(String, Value)>) {
    for (name, value) in values {
        if let Some(slot) = prop.element_mut(&name) {
            slot.value = value;
        }
    }
}
