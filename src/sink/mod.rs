//! Downstream simulator sink: newline-delimited JSON over TCP.
//!
//! The session only ever calls [`ShotSink::send_shot`] and observes a
//! boolean; connection lifecycle stays out of the session's concern.
//! Inbound lines from the simulator (player info, handicap updates) are
//! parsed and logged.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::codec::ShotRecord;

/// Errors from the sink's connection management.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("TCP connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("Not connected to the simulator")]
    NotConnected,
}

/// Where decoded shots go.
#[async_trait]
pub trait ShotSink: Send + Sync {
    /// Send one shot downstream; `true` on success.
    async fn send_shot(&self, shot: &ShotRecord) -> bool;
}

/// TCP/JSON sink for the GSPro Connect protocol (one JSON object per line).
pub struct GsproSink {
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl GsproSink {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the TCP connection and start draining inbound responses.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), SinkError> {
        let stream = TcpStream::connect((host, port)).await?;
        tracing::info!(host, port, "simulator connection established");

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<serde_json::Value>(&line) {
                        Ok(value) => tracing::info!(response = %value, "simulator message"),
                        Err(e) => tracing::warn!(error = %e, "unparseable simulator message"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "simulator read error");
                        break;
                    }
                }
            }
            tracing::info!("simulator connection closed");
        });

        Ok(())
    }

    /// Drop the connection. Safe when already disconnected.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
            tracing::info!("simulator connection shut down");
        }
    }

    /// Whether a connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write one JSON value as a newline-terminated frame.
    pub async fn send_json(&self, value: &serde_json::Value) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            tracing::warn!("send_json with no simulator connection");
            return false;
        };

        let mut frame = value.to_string();
        frame.push('\n');

        match writer.write_all(frame.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "simulator write failed, dropping connection");
                *guard = None;
                false
            }
        }
    }
}

impl Default for GsproSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShotSink for GsproSink {
    async fn send_shot(&self, shot: &ShotRecord) -> bool {
        match serde_json::to_value(shot) {
            Ok(value) => self.send_json(&value).await,
            Err(e) => {
                tracing::warn!(error = %e, "shot serialization failed");
                false
            }
        }
    }
}
