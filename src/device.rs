//! V4L2 control access through raw ioctls on short-lived file handles.
//!
//! A persistent handle is never kept: a streaming process may be opening and
//! closing the same node concurrently, so every operation opens the node,
//! issues its ioctls and closes it again.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{
    V4l2Control, V4l2Queryctrl, V4l2Querymenu, VIDIOC_G_CTRL, VIDIOC_QUERYCTRL, VIDIOC_QUERYMENU,
    VIDIOC_S_CTRL,
};
use crate::traits::{ControlBackend, ControlError, ControlHandle, Result};

/// Kernel video nodes of the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl ControlBackend for V4l2Backend {
    type Handle = V4l2Node;

    fn video_nodes(&self) -> Vec<PathBuf> {
        v4l::context::enum_devices()
            .iter()
            .map(|node| node.path().to_path_buf())
            .collect()
    }

    fn open(&self, path: &Path) -> Result<V4l2Node> {
        V4l2Node::open(path)
    }
}

/// An open video node; closed on drop.
#[derive(Debug)]
pub struct V4l2Node {
    file: File,
}

impl V4l2Node {
    /// Open a node read-write.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ControlError::DeviceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }

    #[allow(unsafe_code)]
    fn ioctl<T>(&self, request: u32, arg: &mut T) -> io::Result<()> {
        // SAFETY: every caller passes a `#[repr(C)]` record whose size is
        // encoded in `request`, and the fd stays open for the whole call.
        let result = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                std::ptr::from_mut(arg),
            )
        };
        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl ControlHandle for V4l2Node {
    fn query_control(&mut self, id: u32) -> io::Result<V4l2Queryctrl> {
        let mut query = V4l2Queryctrl::request(id);
        self.ioctl(VIDIOC_QUERYCTRL, &mut query)?;
        Ok(query)
    }

    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<V4l2Querymenu> {
        let mut query = V4l2Querymenu::request(id, index);
        self.ioctl(VIDIOC_QUERYMENU, &mut query)?;
        Ok(query)
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        let mut control = V4l2Control { id, value: 0 };
        self.ioctl(VIDIOC_G_CTRL, &mut control).inspect_err(|err| {
            debug!(control_id = id, %err, "VIDIOC_G_CTRL failed");
        })?;
        Ok(control.value)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut control = V4l2Control { id, value };
        self.ioctl(VIDIOC_S_CTRL, &mut control)?;
        if control.value != value {
            debug!(
                control_id = id,
                requested = value,
                actual = control.value,
                "V4L2 control value was clamped"
            );
        }
        Ok(())
    }
}
