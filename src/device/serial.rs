// src/device/serial.rs - Line-acknowledged serial link to printer firmware
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serial2_tokio::SerialPort;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::{CommandChannel, CompletionCallback, PositioningMode};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not connected to printer")]
    NotConnected,
    #[error("Timeout waiting for acknowledgment")]
    Timeout,
}

struct Outgoing {
    command: String,
    on_complete: Option<CompletionCallback>,
}

/// Printer firmware reached over a serial line.
///
/// Commands are queued and written one at a time; the next command is only
/// written after the firmware answered the previous one with `ok`. Completion
/// callbacks run on the link task, never inside `submit`. When the link goes
/// down every outstanding callback still runs, with whatever reply lines had
/// arrived, after `is_connected` has turned false.
pub struct SerialDevice {
    name: String,
    queue: mpsc::UnboundedSender<Outgoing>,
    connected: Arc<AtomicBool>,
    positioning: Mutex<PositioningMode>,
    runtime: Handle,
}

impl SerialDevice {
    /// Open a serial port and start the link task. Must be called inside a tokio runtime.
    pub fn open(name: &str, port: &str, baud: u32) -> Result<Arc<Self>, DeviceError> {
        tracing::info!(printer = %name, "Connecting to printer: {} at {} baud", port, baud);
        let port = SerialPort::open(port, baud)?;
        Ok(Self::spawn(name, port))
    }

    /// Start the link task over any byte stream speaking the firmware's line protocol.
    pub fn spawn<S>(name: &str, stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (queue, commands) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(run_link(name.to_string(), stream, commands, connected.clone()));
        Arc::new(Self {
            name: name.to_string(),
            queue,
            connected,
            positioning: Mutex::new(PositioningMode::default()),
            runtime: Handle::current(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until every command queued so far has been acknowledged.
    ///
    /// Sends `M400` (finish moves) behind the queue and waits for its reply.
    pub async fn sync(&self, timeout: Duration) -> Result<Vec<String>, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.submit(
            "M400",
            Some(Box::new(move |reply| {
                let _ = tx.send(reply);
            })),
        );
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) if reply.last().is_some_and(|line| line.starts_with("ok")) => Ok(reply),
            Ok(_) => Err(DeviceError::NotConnected),
            Err(_) => Err(DeviceError::Timeout),
        }
    }
}

impl CommandChannel for SerialDevice {
    fn submit(&self, command: &str, on_complete: Option<CompletionCallback>) {
        self.positioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(command);
        let outgoing = Outgoing {
            command: command.to_string(),
            on_complete,
        };
        if let Err(mpsc::error::SendError(outgoing)) = self.queue.send(outgoing) {
            tracing::warn!(printer = %self.name, "Dropping command '{}': link closed", command);
            if let Some(callback) = outgoing.on_complete {
                self.runtime.spawn(async move { callback(Vec::new()) });
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn positioning_mode(&self) -> PositioningMode {
        *self.positioning.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn run_link<S>(
    name: String,
    stream: S,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    connected: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut interrupted: Option<(CompletionCallback, Vec<String>)> = None;

    'commands: while let Some(Outgoing { command, on_complete }) = commands.recv().await {
        tracing::debug!(printer = %name, "TX: {}", command);
        let written = match writer.write_all(format!("{}\n", command).as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::error!(printer = %name, "Serial write error: {}", e);
            interrupted = on_complete.map(|callback| (callback, Vec::new()));
            break;
        }

        let mut reply = Vec::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!(printer = %name, "RX: {}", line);
                    if line.starts_with("Error") || line.starts_with("!!") {
                        tracing::warn!(printer = %name, "Firmware reported: {}", line);
                    }
                    let acknowledged = line.starts_with("ok");
                    reply.push(line.to_string());
                    if acknowledged {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(printer = %name, "Serial connection closed by remote");
                    interrupted = on_complete.map(|callback| (callback, reply));
                    break 'commands;
                }
                Err(e) => {
                    tracing::error!(printer = %name, "Serial read error: {}", e);
                    interrupted = on_complete.map(|callback| (callback, reply));
                    break 'commands;
                }
            }
        }

        if let Some(callback) = on_complete {
            callback(reply);
        }
    }

    connected.store(false, Ordering::SeqCst);
    commands.close();
    if let Some((callback, reply)) = interrupted {
        callback(reply);
    }
    while let Ok(Outgoing { command, on_complete }) = commands.try_recv() {
        tracing::warn!(printer = %name, "Dropping command '{}': link closed", command);
        if let Some(callback) = on_complete {
            callback(Vec::new());
        }
    }
    tracing::info!(printer = %name, "Serial link task terminated");
}
