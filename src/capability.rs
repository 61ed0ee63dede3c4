//! Camera family detection and the I2C capability model.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::traits::{BusOpener, ControlError, I2cBus, VideoControl};

/// One controllable axis reachable over I2C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Horizontal rotation.
    Pan,
    /// Vertical rotation.
    Tilt,
    /// Optical zoom.
    Zoom,
    /// Lens focus.
    Focus,
    /// Infrared-cut filter.
    Ircut,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Self; 5] = [Self::Pan, Self::Tilt, Self::Zoom, Self::Focus, Self::Ircut];

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pan => "pan",
            Self::Tilt => "tilt",
            Self::Zoom => "zoom",
            Self::Focus => "focus",
            Self::Ircut => "ircut",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ControlError::Config(format!("unknown capability '{s}'")))
    }
}

/// Set of capabilities enabled for the I2C path.
pub type CapabilitySet = BTreeSet<Capability>;

/// Kind of I2C-controlled camera attached to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFamily {
    /// Pan/tilt/zoom/focus/ircut over named registers.
    Ptz,
    /// Focus-only lens actuator with a bit-packed DAC encoding.
    Motorized,
    /// No peripheral answered.
    None,
}

impl CameraFamily {
    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ptz => "ptz",
            Self::Motorized => "motorized",
            Self::None => "none",
        }
    }

    /// Numeric id understood by older front ends.
    pub const fn legacy_id(self) -> &'static str {
        match self {
            Self::Ptz => "1",
            Self::Motorized => "0",
            Self::None => "2",
        }
    }
}

impl fmt::Display for CameraFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities a camera family declares.
pub fn capabilities_for(family: CameraFamily) -> CapabilitySet {
    match family {
        CameraFamily::Ptz => Capability::ALL.into_iter().collect(),
        CameraFamily::Motorized => CapabilitySet::from([Capability::Focus]),
        CameraFamily::None => CapabilitySet::new(),
    }
}

const FOCUS_NAMES: [&str; 3] = ["focus", "focus (absolute)", "focus_absolute"];
const ZOOM_NAMES: [&str; 4] = ["zoom", "zoom (absolute)", "zoom_absolute", "zoom, absolute"];

/// Cross-check declared focus/zoom capabilities against kernel controls.
///
/// With no controls there is no evidence and `base` is returned unchanged.
/// Focus or zoom is dropped only when the controls confirm at least one of
/// the two but not that one. Pan, tilt and ircut have no kernel-control
/// counterpart and are never dropped.
pub fn refine(base: &CapabilitySet, controls: &[VideoControl]) -> CapabilitySet {
    if controls.is_empty() {
        return base.clone();
    }

    let names: HashSet<String> = controls.iter().map(|c| c.name.to_lowercase()).collect();
    let mut confirmed = HashSet::new();
    for name in &names {
        if FOCUS_NAMES.contains(&name.as_str()) {
            confirmed.insert(Capability::Focus);
        }
        if ZOOM_NAMES.contains(&name.as_str()) {
            confirmed.insert(Capability::Zoom);
        }
    }

    let mut refined = base.clone();
    if !confirmed.is_empty() {
        for cap in [Capability::Focus, Capability::Zoom] {
            if !confirmed.contains(&cap) && refined.remove(&cap) {
                debug!(capability = %cap, "Dropping I2C capability not confirmed by V4L2");
            }
        }
    }
    refined
}

/// Result of probing the I2C buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Detected family.
    pub family: CameraFamily,
    /// Bus the peripheral answered on.
    pub bus: Option<u32>,
}

/// Find the motor controller: bus `ptz_bus` means PTZ, any other bus a
/// focus-only actuator.
pub fn detect_family<O: BusOpener>(opener: &O, ptz_bus: u32, address: u16) -> Detection {
    if probe_bus(opener, ptz_bus, address) {
        return Detection {
            family: CameraFamily::Ptz,
            bus: Some(ptz_bus),
        };
    }
    for (number, _) in opener.bus_nodes() {
        if number != ptz_bus && probe_bus(opener, number, address) {
            return Detection {
                family: CameraFamily::Motorized,
                bus: Some(number),
            };
        }
    }
    Detection {
        family: CameraFamily::None,
        bus: None,
    }
}

fn probe_bus<O: BusOpener>(opener: &O, number: u32, address: u16) -> bool {
    let found = opener
        .open(number, address)
        .and_then(|mut bus| bus.read_byte())
        .is_ok();
    if found {
        info!(bus = number, address = format_args!("{address:#04x}"), "I2C peripheral answered");
    }
    found
}
