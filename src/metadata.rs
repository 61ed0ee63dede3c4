//! One-shot informational camera metadata probe.
//!
//! The probe may hang inside a camera stack, so it runs on a detached thread
//! and is abandoned if it does not answer within its time budget.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::traits::Result;

/// Metadata reported by the probe for one camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    /// Display name.
    pub name: String,
    /// Node the metadata was read from.
    pub device: PathBuf,
    /// Kernel driver.
    pub driver: String,
    /// Card name.
    pub card: String,
    /// Bus location.
    pub bus_info: String,
}

/// Source of informational camera metadata.
pub trait MetadataProbe: Send {
    /// Collect metadata; may block.
    fn probe(&self) -> Result<Vec<MetadataEntry>>;
}

/// Outcome of the metadata probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Not run yet.
    #[default]
    Pending,
    /// Entries were captured.
    Ok,
    /// Did not finish in time and was abandoned.
    Timeout,
    /// Failed.
    Error,
    /// Finished without entries, or no probe configured.
    Skipped,
}

impl ProbeStatus {
    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Run `probe` on a detached thread, waiting at most `timeout`.
pub fn run_probe(
    probe: Box<dyn MetadataProbe>,
    timeout: Duration,
) -> (ProbeStatus, Vec<MetadataEntry>) {
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("metadata-probe".to_owned())
        .spawn(move || {
            // The receiver is gone if the probe was abandoned.
            let _ = tx.send(probe.probe());
        });
    if let Err(err) = spawned {
        warn!(%err, "Could not start metadata probe");
        return (ProbeStatus::Error, Vec::new());
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(entries)) if entries.is_empty() => {
            info!("Metadata probe captured nothing");
            (ProbeStatus::Skipped, entries)
        }
        Ok(Ok(entries)) => {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            info!(
                count = entries.len(),
                cameras = %names.join(", "),
                "Metadata probe captured entries"
            );
            (ProbeStatus::Ok, entries)
        }
        Ok(Err(err)) => {
            warn!(%err, "Metadata probe failed");
            (ProbeStatus::Error, Vec::new())
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                timeout_ms = timeout.as_millis(),
                "Metadata probe timed out, abandoning it"
            );
            (ProbeStatus::Timeout, Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("Metadata probe thread exited without a result");
            (ProbeStatus::Error, Vec::new())
        }
    }
}

/// Reads driver capabilities of every video node through the `v4l` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4lCapsProbe;

impl MetadataProbe for V4lCapsProbe {
    fn probe(&self) -> Result<Vec<MetadataEntry>> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by(|a, b| a.path().cmp(b.path()));

        let mut entries = Vec::new();
        for node in nodes {
            let path = node.path().to_path_buf();
            let caps = match v4l::Device::with_path(&path).and_then(|dev| dev.query_caps()) {
                Ok(caps) => caps,
                Err(err) => {
                    debug!(device = %path.display(), %err, "No capabilities for node");
                    continue;
                }
            };
            entries.push(MetadataEntry {
                name: node.name().unwrap_or_else(|| caps.card.clone()),
                device: path,
                driver: caps.driver,
                card: caps.card,
                bus_info: caps.bus,
            });
        }
        Ok(entries)
    }
}
