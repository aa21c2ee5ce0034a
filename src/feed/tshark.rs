//! Dissector subprocess and line reader

use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ek::{parse_ek_line, EK_FIELDS};
use crate::config::{feed_channel_capacity, tshark_path};
use crate::error::{Error, Result};
use crate::models::PacketRecord;

/// Bounded, ordered record channel sized from config
pub fn record_channel() -> (mpsc::Sender<PacketRecord>, mpsc::Receiver<PacketRecord>) {
    mpsc::channel(feed_channel_capacity())
}

/// Forward every parseable line from `reader` to `tx`, in order.
///
/// Stops at end of input or when the receiver is dropped. Returns the number
/// of records forwarded.
pub async fn read_records<R>(mut reader: R, tx: mpsc::Sender<PacketRecord>) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut forwarded = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[FEED] Read error, stopping feed: {}", e);
                break;
            }
        }

        // invalid UTF-8 inside a field is replaced, the rest of the record survives
        let line = String::from_utf8_lossy(&buf);
        let Some(record) = parse_ek_line(&line) else {
            tracing::trace!("[FEED] Skipping unparseable line ({} bytes)", buf.len());
            continue;
        };
        if tx.send(record).await.is_err() {
            tracing::debug!("[FEED] Receiver dropped, stopping feed");
            break;
        }
        forwarded += 1;
    }

    forwarded
}

/// Command line for the external dissector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DissectorCommand {
    pub program: String,
    pub interface: Option<String>,
    pub capture_filter: Option<String>,
}

impl DissectorCommand {
    pub fn new(interface: Option<String>) -> Self {
        Self {
            program: tshark_path(),
            interface,
            capture_filter: None,
        }
    }

    pub fn with_capture_filter(mut self, filter: impl Into<String>) -> Self {
        self.capture_filter = Some(filter.into());
        self
    }

    /// `-l` line-buffered, `-n` no name resolution, `-T ek` flattened JSON
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(interface) = &self.interface {
            args.push("-i".to_string());
            args.push(interface.clone());
        }
        for flag in ["-l", "-n", "-T", "ek"] {
            args.push(flag.to_string());
        }
        for field in EK_FIELDS {
            args.push("-e".to_string());
            args.push(field.to_string());
        }
        if let Some(filter) = &self.capture_filter {
            args.push("-f".to_string());
            args.push(filter.clone());
        }
        args
    }

    /// Start the dissector and stream its records into `tx`.
    pub fn spawn(&self, tx: mpsc::Sender<PacketRecord>) -> Result<DissectorFeed> {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::capture(format!("Failed to start {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::capture("Dissector stdout was not captured"))?;

        tracing::info!(
            "[FEED] Started {} (interface: {}, filter: {})",
            self.program,
            self.interface.as_deref().unwrap_or("default"),
            self.capture_filter.as_deref().unwrap_or("none")
        );

        let reader = tokio::spawn(read_records(BufReader::new(stdout), tx));
        Ok(DissectorFeed { child, reader })
    }
}

/// A running dissector
pub struct DissectorFeed {
    child: Child,
    reader: JoinHandle<u64>,
}

impl DissectorFeed {
    /// Kill the dissector and wait for the reader to drain. Returns records forwarded.
    pub async fn shutdown(mut self) -> u64 {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("[FEED] Dissector already exited: {}", e);
        }
        match self.reader.await {
            Ok(forwarded) => forwarded,
            Err(e) => {
                tracing::warn!("[FEED] Reader task failed: {}", e);
                0
            }
        }
    }
}
