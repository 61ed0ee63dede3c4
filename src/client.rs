//! Video control protocol client.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::codec::{V4l2Queryctrl, CTRL_FLAG_NEXT_CTRL};
use crate::traits::{
    ControlBackend, ControlError, ControlHandle, ControlType, Result, VideoControl,
};

/// Enumerates, reads and writes kernel video controls.
///
/// Every call opens its device node transiently through the backend.
#[derive(Debug, Clone, Default)]
pub struct ControlClient<B> {
    backend: B,
}

impl<B: ControlBackend> ControlClient<B> {
    /// Create a client over `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Read the current value of control `id` on `device`.
    pub fn get_value(&self, device: &Path, id: u32) -> Result<i32> {
        let mut handle = self.backend.open(device)?;
        handle
            .get_control(id)
            .map_err(|source| ControlError::QueryFailed { id, source })
    }

    /// Write control `id` on `device`. No retry; callers verify by reading back.
    pub fn set_value(&self, device: &Path, id: u32, value: i32) -> Result<()> {
        let mut handle = self.backend.open(device)?;
        handle
            .set_control(id, value)
            .map_err(|source| ControlError::SetFailed { id, value, source })
    }

    /// Enumerate every actionable control on `device`.
    ///
    /// A node that cannot be opened has no controls.
    pub fn enumerate(&self, device: &Path) -> Vec<VideoControl> {
        match self.backend.open(device) {
            Ok(mut handle) => enumerate_controls(&mut handle, device),
            Err(err) => {
                debug!(device = %device.display(), %err, "Skipping video node");
                Vec::new()
            }
        }
    }
}

/// Walk the controls of an open node with the next-control convention.
pub fn enumerate_controls<H: ControlHandle>(handle: &mut H, device: &Path) -> Vec<VideoControl> {
    let mut controls = Vec::new();
    let mut cursor = CTRL_FLAG_NEXT_CTRL;
    let mut previous: Option<u32> = None;

    // The first failed query means there are no more controls.
    while let Ok(desc) = handle.query_control(cursor) {
        // A driver that does not advance the cursor would loop forever.
        if previous.is_some_and(|prev| desc.id <= prev) {
            debug!(device = %device.display(), id = desc.id, "Control cursor did not advance");
            break;
        }
        previous = Some(desc.id);
        cursor = desc.id | CTRL_FLAG_NEXT_CTRL;

        if let Some(control) = describe_control(handle, &desc, device) {
            controls.push(control);
        }
    }

    controls
}

fn describe_control<H: ControlHandle>(
    handle: &mut H,
    desc: &V4l2Queryctrl,
    device: &Path,
) -> Option<VideoControl> {
    if desc.is_disabled() {
        return None;
    }
    let control_type = ControlType::from_kernel(desc.ctrl_type)?;
    let name = desc.name();

    let value = handle.get_control(desc.id).unwrap_or(desc.default_value);

    let menu_items = if control_type.has_menu() {
        query_menu_items(handle, desc, control_type)
    } else {
        BTreeMap::new()
    };

    debug!(
        device = %device.display(),
        id = desc.id,
        name = %name,
        kind = control_type.as_str(),
        value,
        "Discovered control"
    );

    Some(VideoControl {
        id: desc.id,
        name,
        control_type,
        minimum: desc.minimum,
        maximum: desc.maximum,
        step: desc.step.max(1),
        default_value: desc.default_value,
        value,
        flags: desc.flags,
        device: device.to_path_buf(),
        read_only: desc.is_read_only(),
        inactive: desc.is_inactive(),
        menu_items,
    })
}

/// Menus may be sparse: indices the driver refuses are skipped.
fn query_menu_items<H: ControlHandle>(
    handle: &mut H,
    desc: &V4l2Queryctrl,
    control_type: ControlType,
) -> BTreeMap<u32, String> {
    let mut items = BTreeMap::new();
    for raw_index in desc.minimum..=desc.maximum {
        let Ok(index) = u32::try_from(raw_index) else {
            continue;
        };
        let Ok(item) = handle.query_menu(desc.id, index) else {
            continue;
        };
        let label = if control_type == ControlType::IntegerMenu {
            item.value().to_string()
        } else {
            item.name()
        };
        items.insert(index, label);
    }
    items
}
