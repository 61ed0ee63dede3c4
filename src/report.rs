//! Serializable capability report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::capability::{CameraFamily, Capability};
use crate::metadata::{MetadataEntry, ProbeStatus};
use crate::traits::{ControlType, VideoControl};

/// Everything a front end needs to build its controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    /// Detected I2C camera family.
    pub camera_type: CameraFamily,
    /// Enabled I2C capabilities in sorted order.
    pub i2c_capabilities: Vec<Capability>,
    /// Kernel video controls of the current snapshot.
    pub v4l2_controls: Vec<ControlReport>,
    /// Informational metadata captured at startup.
    ///
    /// One entry per video node with the driver, card and bus location the
    /// node reports. These are node descriptions, not control ranges; the
    /// key keeps its name so existing front ends find it.
    pub libcamera_controls: Vec<MetadataEntry>,
    /// Detection and probe summary.
    pub diagnostics: Diagnostics,
}

/// One control as presented to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReport {
    /// Kernel control identifier.
    pub id: u32,
    /// Driver-reported name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub control_type: ControlType,
    /// Minimum value.
    pub min: i32,
    /// Maximum value.
    pub max: i32,
    /// Step, at least 1.
    pub step: i32,
    /// Driver default.
    pub default: i32,
    /// Last known value.
    pub value: i32,
    /// Cannot be written.
    pub read_only: bool,
    /// Currently inactive.
    pub inactive: bool,
    /// Owning node.
    pub device: PathBuf,
    /// Menu labels keyed by the decimal index.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub menu_items: BTreeMap<String, String>,
}

impl From<&VideoControl> for ControlReport {
    fn from(control: &VideoControl) -> Self {
        Self {
            id: control.id,
            name: control.name.clone(),
            control_type: control.control_type,
            min: control.minimum,
            max: control.maximum,
            step: control.step,
            default: control.default_value,
            value: control.value,
            read_only: control.read_only,
            inactive: control.inactive,
            device: control.device.clone(),
            menu_items: control
                .menu_items
                .iter()
                .map(|(index, label)| (index.to_string(), label.clone()))
                .collect(),
        }
    }
}

/// Summary for a status panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Number of `i2c-N` nodes.
    pub i2c_buses_found: usize,
    /// Sorted `i2c-N` node paths.
    pub i2c_bus_paths: Vec<PathBuf>,
    /// Number of video nodes.
    pub video_devices_found: usize,
    /// Sorted video node paths.
    pub video_device_paths: Vec<PathBuf>,
    /// Detected family.
    pub camera_type: CameraFamily,
    /// Bus the family was detected on.
    pub i2c_bus_number: Option<u32>,
    /// Enabled I2C capabilities.
    pub i2c_capabilities_count: usize,
    /// Controls in the current snapshot.
    pub v4l2_controls_count: usize,
    /// Node descriptions captured by the metadata probe.
    pub libcamera_controls_count: usize,
    /// Outcome of the metadata probe.
    pub libcamera_probe_status: ProbeStatus,
}
