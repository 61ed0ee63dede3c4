//! Registry of kernel video controls discovered across all video nodes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::client::ControlClient;
use crate::traits::{ControlBackend, VideoControl};

/// One complete, immutable generation of discovered controls.
pub type Snapshot = Arc<Vec<VideoControl>>;

/// Holds the latest control snapshot.
///
/// Each probe pass publishes a new generation by swapping the `Arc`, so
/// readers always see one whole generation and never a partial mix.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    snapshot: RwLock<Snapshot>,
}

impl ControlRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe every video node and publish the merged result.
    pub fn probe_all<B: ControlBackend>(&self, client: &ControlClient<B>) -> Snapshot {
        let mut devices = client.backend().video_nodes();
        devices.sort();

        let per_device = devices
            .iter()
            .map(|device| (device.clone(), client.enumerate(device)));
        let snapshot: Snapshot = Arc::new(merge_controls(per_device));

        if snapshot.is_empty() {
            info!("No V4L2 controls found on any video node");
        } else {
            let names: Vec<&str> = snapshot.iter().map(|c| c.name.as_str()).collect();
            info!(count = snapshot.len(), controls = %names.join(", "), "V4L2 controls discovered");
        }

        self.publish(Arc::clone(&snapshot));
        snapshot
    }

    /// The current generation.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Look up a control in the current generation.
    pub fn find(&self, id: u32) -> Option<VideoControl> {
        self.snapshot().iter().find(|c| c.id == id).cloned()
    }

    /// Publish a generation in which control `id` caches `value`.
    ///
    /// Returns `false` if the control is not in the current generation.
    pub fn update_value(&self, id: u32, value: i32) -> bool {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = guard.iter().position(|c| c.id == id) else {
            return false;
        };
        let mut next = Vec::clone(&guard);
        if let Some(control) = next.get_mut(pos) {
            control.value = value;
        }
        *guard = Arc::new(next);
        true
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Fold per-device control lists, keeping the first occurrence of each id.
///
/// Input order decides ownership, so callers pass devices sorted by path.
pub fn merge_controls<I>(per_device: I) -> Vec<VideoControl>
where
    I: IntoIterator<Item = (PathBuf, Vec<VideoControl>)>,
{
    let mut seen = HashSet::new();
    per_device
        .into_iter()
        .flat_map(|(_, controls)| controls)
        .filter(|control| seen.insert(control.id))
        .collect()
}
