// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection driver: runs the listen loop and issues commands.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::discovery::{open_stream, Discovery, Endpoint};
use crate::error::{Result, SessionError};
use crate::events::{EventKind, SessionEvent, StopReason};
use crate::protocol::{format_bytes, Checksum, Crc8Maxim, DeviceCommand, FrameCodec, OutboundFrame};
use crate::session::{Output, SessionMachine, SessionOptions};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write half of the transport.
#[derive(Clone)]
struct TransportWriter {
    inner: Arc<tokio::sync::Mutex<BoxedWriter>>,
}

impl TransportWriter {
    fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }

    async fn send(&self, bytes: &[u8]) -> std::io::Result<usize> {
        let mut writer = self.inner.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(bytes.len())
    }

    async fn close(&self) -> std::io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

/// Acknowledgement that a command was written and is now pending.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub command: DeviceCommand,
    pub frame: OutboundFrame,
    pub bytes_written: usize,
}

/// A live transport plus its listener task.
pub struct SessionConnection {
    endpoint: String,
    writer: TransportWriter,
    wake: Arc<Notify>,
    stop_tx: mpsc::Sender<StopReason>,
    listener: JoinHandle<()>,
}

impl SessionConnection {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the listen loop is still running.
    pub fn is_alive(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Ask the listener to stop with `reason`.
    fn stop(&self, reason: StopReason) {
        if let Err(e) = self.stop_tx.try_send(reason) {
            debug!("Listener already stopping: {}", e);
        }
    }

    /// Cancel the listener and release the transport.
    async fn close(mut self) {
        self.stop(StopReason::Cancelled);
        if let Err(e) = (&mut self.listener).await {
            error!("Listener task failed: {}", e);
        }
        if let Err(e) = self.writer.close().await {
            debug!("Transport close: {}", e);
        }
    }
}

/// Where the listen loop sends frames and events.
struct Outlet {
    writer: TransportWriter,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl Outlet {
    async fn carry_out(&self, outputs: Vec<Output>) -> std::result::Result<(), StopReason> {
        for output in outputs {
            match output {
                Output::Emit(kind) => self.emit(kind).await,
                Output::Transmit(frame) => {
                    debug!("Resending: {}", format_bytes(frame.bytes()));
                    self.emit(EventKind::CommandSent {
                        command: frame.command(),
                        frame: frame.bytes().to_vec(),
                    })
                    .await;
                    if let Err(e) = self.writer.send(frame.bytes()).await {
                        error!("Send error: {}", e);
                        self.emit(EventKind::Error(e.to_string())).await;
                        return Err(StopReason::TransportError(e.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    async fn emit(&self, kind: EventKind) {
        emit(&self.event_tx, kind).await;
    }
}

/// Everything the listen loop needs.
struct Listener<R> {
    reader: R,
    machine: Arc<Mutex<SessionMachine>>,
    outlet: Outlet,
    wake: Arc<Notify>,
    stop_rx: mpsc::Receiver<StopReason>,
    buffer_size: usize,
}

impl<R: AsyncRead + Unpin> Listener<R> {
    /// Read chunks until stopped or the transport ends.
    async fn run(self) {
        let Listener {
            mut reader,
            machine,
            outlet,
            wake,
            mut stop_rx,
            buffer_size,
        } = self;

        info!("Listener started");
        let mut buf = vec![0u8; buffer_size.max(1)];

        let reason = loop {
            let deadline = machine.lock().deadline();

            tokio::select! {
                stop = stop_rx.recv() => break stop.unwrap_or(StopReason::Cancelled),
                _ = wake.notified() => continue,
                _ = wait_until(deadline) => {
                    let outputs = machine.lock().on_tick(Instant::now());
                    if let Err(reason) = outlet.carry_out(outputs).await {
                        break reason;
                    }
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break StopReason::EndOfStream,
                    Ok(n) => {
                        debug!("Received {} bytes: {}", n, format_bytes(&buf[..n]));
                        let outputs = machine.lock().on_chunk(&buf[..n], Instant::now());
                        if let Err(reason) = outlet.carry_out(outputs).await {
                            break reason;
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        outlet.emit(EventKind::Error(e.to_string())).await;
                        break StopReason::TransportError(e.to_string());
                    }
                },
            }
        };

        let abandoned = machine.lock().cancel();
        if let Some(pending) = abandoned {
            debug!("Abandoning pending {}", pending.command);
        }

        match &reason {
            StopReason::Cancelled => info!("Reading task was cancelled, cleaning up"),
            other => warn!("Listener stopped: {}", other),
        }
        let ended_by_link = reason != StopReason::Cancelled;
        outlet.emit(EventKind::ListenerStopped(reason)).await;
        if ended_by_link {
            outlet.emit(EventKind::Disconnected).await;
        }
    }
}

async fn emit(event_tx: &mpsc::Sender<SessionEvent>, kind: EventKind) {
    if let Err(e) = event_tx.send(SessionEvent::now(kind)).await {
        debug!("Event dropped, no receiver: {}", e.0.kind.describe());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns the protocol engine and at most one connection.
pub struct Session {
    options: SessionOptions,
    machine: Arc<Mutex<SessionMachine>>,
    event_tx: mpsc::Sender<SessionEvent>,
    connection: Option<SessionConnection>,
}

impl Session {
    /// Create a session with the default checksum provider.
    pub fn new(options: SessionOptions, event_tx: mpsc::Sender<SessionEvent>) -> Self {
        Self::with_checksum(options, Arc::new(Crc8Maxim), event_tx)
    }

    /// Create a session with a specific checksum provider.
    pub fn with_checksum(
        options: SessionOptions,
        checksum: Arc<dyn Checksum>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let codec = FrameCodec::new(checksum).with_inbound_verification(options.verify_inbound_checksum);
        Self {
            options,
            machine: Arc::new(Mutex::new(SessionMachine::new(codec, &options))),
            event_tx,
            connection: None,
        }
    }

    /// Whether a connection with a running listener exists.
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_alive())
    }

    /// Command currently awaiting a response.
    pub fn pending(&self) -> Option<DeviceCommand> {
        self.machine.lock().pending().map(|p| p.command)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.endpoint())
    }

    /// Connect to a Bluetooth endpoint over RFCOMM.
    pub async fn connect(&mut self, endpoint: &Endpoint, channel: u8) -> Result<()> {
        self.disconnect().await;
        self.emit(EventKind::Connecting {
            endpoint: endpoint.name.clone(),
        })
        .await;

        match open_stream(endpoint, channel).await {
            Ok(stream) => {
                self.attach(endpoint.name.clone(), stream).await;
                Ok(())
            }
            Err(e) => {
                error!("Cannot connect to {}: {}", endpoint, e);
                self.emit(EventKind::Error(format!("Cannot connect to bluetooth device: {}", e)))
                    .await;
                self.emit(EventKind::Disconnected).await;
                Err(e)
            }
        }
    }

    /// Take ownership of an open byte stream and start listening on it.
    ///
    /// Any existing connection is torn down first.
    pub async fn attach<S>(&mut self, endpoint: impl Into<String>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.disconnect().await;
        let endpoint = endpoint.into();

        let (reader, writer) = tokio::io::split(stream);
        let writer = TransportWriter::new(Box::new(writer));
        let wake = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let listener = Listener {
            reader,
            machine: self.machine.clone(),
            outlet: Outlet {
                writer: writer.clone(),
                event_tx: self.event_tx.clone(),
            },
            wake: wake.clone(),
            stop_rx,
            buffer_size: self.options.read_buffer_size,
        };
        let listener = tokio::spawn(listener.run());

        info!("Connected to {}", endpoint);
        self.connection = Some(SessionConnection {
            endpoint: endpoint.clone(),
            writer,
            wake,
            stop_tx,
            listener,
        });
        self.emit(EventKind::Connected { endpoint }).await;
    }

    /// Issue a command.
    ///
    /// Refused with [`SessionError::Busy`] while another command is pending.
    /// A failed write stops the listener and the connection goes down.
    pub async fn send_command(
        &self,
        command: DeviceCommand,
        is_write: bool,
        payload: &[u8],
    ) -> Result<PendingAck> {
        let connection = self
            .connection
            .as_ref()
            .filter(|c| c.is_alive())
            .ok_or(SessionError::NotConnected)?;

        let frame = self
            .machine
            .lock()
            .begin(command, is_write, payload, Instant::now())?;

        debug!("Data sent: {}", format_bytes(frame.bytes()));
        self.emit(EventKind::CommandSent {
            command,
            frame: frame.bytes().to_vec(),
        })
        .await;

        match connection.writer.send(frame.bytes()).await {
            Ok(bytes_written) => {
                debug!("{} bytes written successfully", bytes_written);
                connection.wake.notify_one();
                Ok(PendingAck {
                    command,
                    frame,
                    bytes_written,
                })
            }
            Err(e) => {
                error!("Send error: {}", e);
                self.machine.lock().cancel();
                self.emit(EventKind::Error(format!("SEND ERROR: {}", e))).await;
                connection.stop(StopReason::TransportError(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Cancel the listener and release the transport.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!("Closing connection to {}", connection.endpoint());
            let was_alive = connection.is_alive();
            connection.close().await;
            self.machine.lock().cancel();
            if was_alive {
                self.emit(EventKind::Disconnected).await;
            }
        }
    }

    /// Drop the current connection and list endpoints again.
    pub async fn refresh(&mut self, discovery: &Discovery) -> Result<Vec<Endpoint>> {
        self.disconnect().await;
        let endpoints = discovery.discover().await?;
        info!("Bluetooth device list refreshed");
        Ok(endpoints)
    }

    async fn emit(&self, kind: EventKind) {
        emit(&self.event_tx, kind).await;
    }
}
