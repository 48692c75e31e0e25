//! Per-device command/status transport.
//!
//! Every receiver gets one `DeviceTransport` with two channels:
//!
//! - a persistent TCP line channel (CR-terminated ASCII telegrams both
//!   ways), which is also the only way to receive unsolicited status;
//! - an HTTP request/response fallback used when the persistent connect is
//!   refused, typically because another controller already holds the
//!   receiver's single telnet slot.
//!
//! A refused connect flips the device to `RequestResponse` mode; the
//! persistent channel is retried on the next discovery cycle regardless.
//! Outbound commands in persistent mode go through a queue drained by one
//! writer task, so per-device send order is FIFO. There is no
//! request/response correlation: effects show up later as unrelated inbound
//! telegrams or poll results.

use crate::error::{AvrError, Result};
use crate::telegram::LineBuffer;
use crate::types::TransportMode;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Telnet-style control port used by the persistent channel
pub const CONTROL_PORT: u16 = 23;

/// Tuning for the transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub control_port: u16,
    /// Fixed delay between fallback HTTP calls
    pub pacing: Duration,
    /// Fallback retry attempts before raising `RequestExhausted`
    pub retries: u32,
    /// Fixed backoff between fallback retries
    pub retry_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            pacing: Duration::from_millis(100),
            retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Command/status channel for one receiver
pub struct DeviceTransport {
    address: String,
    config: TransportConfig,
    http: reqwest::Client,
    mode: Arc<StdMutex<TransportMode>>,
    /// Outbound queue; present only while the persistent channel is up
    writer: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
    line_tx: broadcast::Sender<String>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    /// Start time of the last fallback call, for pacing
    last_fallback: Mutex<Instant>,
}

impl DeviceTransport {
    pub fn new(address: String, http: reqwest::Client, config: TransportConfig) -> Self {
        let (line_tx, _) = broadcast::channel(256);
        Self {
            address,
            config,
            http,
            mode: Arc::new(StdMutex::new(TransportMode::Disconnected)),
            writer: Arc::new(StdMutex::new(None)),
            line_tx,
            tasks: StdMutex::new(Vec::new()),
            last_fallback: Mutex::new(Instant::now() - Duration::from_secs(1)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn mode(&self) -> TransportMode {
        *self.mode.lock().unwrap()
    }

    /// Subscribe to inbound telegram lines
    pub fn subscribe_lines(&self) -> broadcast::Receiver<String> {
        self.line_tx.subscribe()
    }

    /// Attempt to (re)establish the persistent channel. Called once per
    /// discovery cycle; a no-op while already connected. A refused connect
    /// selects fallback mode, any other failure leaves the device
    /// disconnected until the next cycle.
    pub async fn connect_persistent(&self) {
        match self.mode() {
            TransportMode::Connected | TransportMode::Connecting => return,
            _ => {}
        }
        *self.mode.lock().unwrap() = TransportMode::Connecting;

        let target = format!("{}:{}", self.address, self.config.control_port);
        tracing::debug!("Connecting persistent channel to {}", target);

        let stream = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                tracing::info!(
                    "{} refused the persistent channel, using request/response mode",
                    self.address
                );
                *self.mode.lock().unwrap() = TransportMode::RequestResponse;
                return;
            }
            Err(e) => {
                tracing::warn!("Persistent connect to {} failed: {}", target, e);
                *self.mode.lock().unwrap() = TransportMode::Disconnected;
                return;
            }
        };

        let (mut read_half, mut write_half) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();

        let write_task = tokio::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                let line = format!("{command}\r");
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::error!("Persistent write failed: {}", e);
                    break;
                }
            }
        });

        let line_tx = self.line_tx.clone();
        let address = self.address.clone();
        let mode = self.mode.clone();
        let writer = self.writer.clone();
        let read_task = tokio::spawn(async move {
            let mut lines = LineBuffer::new();
            let mut buf = [0u8; 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        tracing::info!("Persistent channel to {} closed by peer", address);
                        break;
                    }
                    Ok(n) => {
                        for line in lines.push(&buf[..n]) {
                            let _ = line_tx.send(line);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Persistent channel to {} errored: {}", address, e);
                        break;
                    }
                }
            }
            // Torn down; the next discovery cycle reconnects.
            *writer.lock().unwrap() = None;
            *mode.lock().unwrap() = TransportMode::Disconnected;
        });

        *self.writer.lock().unwrap() = Some(writer_tx);
        *self.mode.lock().unwrap() = TransportMode::Connected;
        {
            // handles from torn-down connections are done; drop them
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|t| !t.is_finished());
            tasks.extend([write_task, read_task]);
        }
        tracing::info!("Persistent channel to {} established", self.address);
    }

    /// Send one command over whichever channel is active. Persistent sends
    /// are queued fire-and-forget; fallback sends are paced, retried, and
    /// raise `RequestExhausted` once retries run out.
    pub async fn send(&self, command: &str) -> Result<()> {
        if self.mode() == TransportMode::Connected {
            let sent = {
                let writer = self.writer.lock().unwrap();
                writer
                    .as_ref()
                    .map(|tx| tx.send(command.to_string()).is_ok())
            };
            match sent {
                Some(true) => return Ok(()),
                // Writer died under us: demote and fall through to HTTP
                _ => self.teardown_persistent(),
            }
        }
        self.send_fallback(command).await
    }

    async fn send_fallback(&self, command: &str) -> Result<()> {
        self.pace().await;

        let encoded = command.replace(' ', "%20");
        let url = format!(
            "http://{}/goform/formiPhoneAppDirect.xml?{}",
            self.address, encoded
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    tracing::warn!("Fallback command to {} answered {}", self.address, resp.status());
                }
                Err(e) => {
                    tracing::warn!("Fallback command to {} failed: {}", self.address, e);
                }
            }
            if attempts > self.config.retries {
                return Err(AvrError::RequestExhausted { attempts });
            }
            sleep(self.config.retry_backoff).await;
        }
    }

    /// Space fallback calls by the configured fixed delay.
    async fn pace(&self) {
        let mut last = self.last_fallback.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.config.pacing {
            sleep(self.config.pacing - elapsed).await;
        }
        *last = Instant::now();
    }

    /// Drop the persistent channel state; reconnect happens on the next
    /// discovery cycle.
    pub fn teardown_persistent(&self) {
        *self.writer.lock().unwrap() = None;
        let mut mode = self.mode.lock().unwrap();
        if *mode == TransportMode::Connected || *mode == TransportMode::Connecting {
            *mode = TransportMode::Disconnected;
        }
    }

    /// Close everything unconditionally; no drain of queued commands.
    pub fn shutdown(&self) {
        self.teardown_persistent();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        *self.mode.lock().unwrap() = TransportMode::Disconnected;
    }
}

impl Drop for DeviceTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
