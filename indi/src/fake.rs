//! In-memory INDI server used by the tests

use crate::{IndiClient, IndiTimeoutConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Server end of a duplex pipe attached to an [`IndiClient`]
pub(crate) struct FakeServer {
    stream: DuplexStream,
    pending: String,
}

/// Short poll intervals so tests run quickly
pub(crate) fn fast_config() -> IndiTimeoutConfig {
    IndiTimeoutConfig {
        connection_timeout_ms: 1_000,
        control_poll_interval_ms: 10,
        state_poll_interval_ms: 10,
        alert_settle_ms: 100,
        control_timeout_ms: 1_000,
        park_timeout_ms: 2_000,
        progress_interval_ms: 50,
    }
}

pub(crate) async fn attach(config: IndiTimeoutConfig) -> (IndiClient, FakeServer) {
    attach_with_cancel(config, &CancellationToken::new()).await
}

pub(crate) async fn attach_with_cancel(
    config: IndiTimeoutConfig,
    cancel: &CancellationToken,
) -> (IndiClient, FakeServer) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let client = IndiClient::from_stream(client_end, config, cancel)
        .await
        .expect("attach fake server");
    (
        client,
        FakeServer {
            stream: server_end,
            pending: String::new(),
        },
    )
}

/// XML for a switch vector (`op` is `def` or `set`)
pub(crate) fn switch_vector_xml(
    op: &str,
    device: &str,
    name: &str,
    state: &str,
    elements: &[(&str, bool)],
) -> String {
    let body: String = elements
        .iter()
        .map(|(e, on)| {
            format!(
                "<{op}Switch name=\"{e}\">{}</{op}Switch>",
                if *on { "On" } else { "Off" },
                op = if op == "def" { "def" } else { "one" },
                e = e
            )
        })
        .collect();
    let extra = if op == "def" {
        " perm=\"rw\" rule=\"OneOfMany\""
    } else {
        ""
    };
    format!(
        "<{op}SwitchVector device=\"{device}\" name=\"{name}\" state=\"{state}\"{extra}>{body}</{op}SwitchVector>",
        op = op,
        device = device,
        name = name,
        state = state,
        extra = extra,
        body = body
    )
}

impl FakeServer {
    /// Write raw XML to the client. Panics if the client end is gone.
    pub(crate) async fn send(&mut self, xml: &str) {
        if let Err(e) = self.try_send(xml).await {
            panic!("fake server write failed: {}", e);
        }
    }

    async fn try_send(&mut self, xml: &str) -> std::io::Result<()> {
        self.stream.write_all(xml.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await
    }

    /// Next command from the client, skipping `getProperties` requests.
    /// Gives up after two seconds of silence.
    pub(crate) async fn next_command(&mut self) -> Option<String> {
        self.read_command(Some(Duration::from_secs(2))).await
    }

    /// Next line from the client, `getProperties` requests included
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        self.read_line(Some(Duration::from_secs(2)), false).await
    }

    async fn read_command(&mut self, limit: Option<Duration>) -> Option<String> {
        self.read_line(limit, true).await
    }

    async fn read_line(&mut self, limit: Option<Duration>, skip_requests: bool) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                let line = line.trim().to_string();
                if line.is_empty() || (skip_requests && line.starts_with("<getProperties")) {
                    continue;
                }
                return Some(line);
            }
            let mut buf = [0u8; 4096];
            let read = match limit {
                Some(limit) => tokio::time::timeout(limit, self.stream.read(&mut buf))
                    .await
                    .ok()?
                    .ok()?,
                None => self.stream.read(&mut buf).await.ok()?,
            };
            if read == 0 {
                return None;
            }
            self.pending.push_str(&String::from_utf8_lossy(&buf[..read]));
        }
    }

    /// Answer every client command with the replies `handler` returns,
    /// each sent after its delay. Resolves to the commands seen once the
    /// client closes the stream. A reply that cannot be written panics the
    /// task, so awaiting the handle fails the test.
    pub(crate) fn spawn_responder<F>(mut self, mut handler: F) -> JoinHandle<Vec<String>>
    where
        F: FnMut(&str) -> Vec<(Duration, String)> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(cmd) = self.read_command(None).await {
                for (delay, reply) in handler(&cmd) {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Err(e) = self.try_send(&reply).await {
                        panic!("reply to {} lost: {}", cmd, e);
                    }
                }
                seen.push(cmd);
            }
            seen
        })
    }
}
