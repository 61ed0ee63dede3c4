//! Request codes and fixed-layout records for the V4L2 control ioctls.
//!
//! Layouts follow the kernel ABI (`videodev2.h`) in native byte order. Record
//! sizes are checked at compile time, so a mismatch is a build failure rather
//! than a runtime error.

use std::mem::size_of;

/// Kernel writes to user memory.
pub const IOC_READ: u32 = 2;
/// Kernel reads from user memory.
pub const IOC_WRITE: u32 = 1;
/// Both directions.
pub const IOC_READ_WRITE: u32 = IOC_READ | IOC_WRITE;

/// Protocol type tag of the video ioctls.
pub const V4L2_IOC_TYPE: u8 = b'V';

/// Compute an ioctl request code.
#[allow(clippy::cast_possible_truncation)]
pub const fn request_code(direction: u32, ioc_type: u8, number: u8, size: usize) -> u32 {
    (direction << 30) | ((size as u32) << 16) | ((ioc_type as u32) << 8) | number as u32
}

/// Read a control value.
pub const VIDIOC_G_CTRL: u32 =
    request_code(IOC_READ_WRITE, V4L2_IOC_TYPE, 27, size_of::<V4l2Control>());
/// Write a control value.
pub const VIDIOC_S_CTRL: u32 =
    request_code(IOC_READ_WRITE, V4L2_IOC_TYPE, 28, size_of::<V4l2Control>());
/// Describe a control.
pub const VIDIOC_QUERYCTRL: u32 =
    request_code(IOC_READ_WRITE, V4L2_IOC_TYPE, 36, size_of::<V4l2Queryctrl>());
/// Describe one menu entry.
pub const VIDIOC_QUERYMENU: u32 =
    request_code(IOC_READ_WRITE, V4L2_IOC_TYPE, 37, size_of::<V4l2Querymenu>());

/// Or'ed into a control id to ask for the next control after it.
pub const CTRL_FLAG_NEXT_CTRL: u32 = 0x8000_0000;

// ===== Control flags =====
/// Control is permanently disabled.
pub const CTRL_FLAG_DISABLED: u32 = 0x0001;
/// Control value cannot be changed.
pub const CTRL_FLAG_READ_ONLY: u32 = 0x0004;
/// Control is inactive.
pub const CTRL_FLAG_INACTIVE: u32 = 0x0010;

// ===== Control types =====
/// 32-bit integer.
pub const CTRL_TYPE_INTEGER: u32 = 1;
/// Boolean.
pub const CTRL_TYPE_BOOLEAN: u32 = 2;
/// Text menu.
pub const CTRL_TYPE_MENU: u32 = 3;
/// Button.
pub const CTRL_TYPE_BUTTON: u32 = 4;
/// 64-bit integer.
pub const CTRL_TYPE_INTEGER64: u32 = 5;
/// Control-class grouping marker.
pub const CTRL_TYPE_CTRL_CLASS: u32 = 6;
/// String.
pub const CTRL_TYPE_STRING: u32 = 7;
/// Bitmask.
pub const CTRL_TYPE_BITMASK: u32 = 8;
/// Integer menu.
pub const CTRL_TYPE_INTEGER_MENU: u32 = 9;

const NAME_LEN: usize = 32;

/// `struct v4l2_queryctrl`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4l2Queryctrl {
    /// Control id; on input may carry [`CTRL_FLAG_NEXT_CTRL`].
    pub id: u32,
    /// Kernel type tag.
    pub ctrl_type: u32,
    /// NUL-terminated name.
    pub name: [u8; NAME_LEN],
    /// Minimum value.
    pub minimum: i32,
    /// Maximum value.
    pub maximum: i32,
    /// Step.
    pub step: i32,
    /// Default value.
    pub default_value: i32,
    /// Flag bits.
    pub flags: u32,
    /// Reserved, must be zero.
    pub reserved: [u32; 2],
}

impl V4l2Queryctrl {
    /// A query record for `id`.
    pub const fn request(id: u32) -> Self {
        Self {
            id,
            ctrl_type: 0,
            name: [0; NAME_LEN],
            minimum: 0,
            maximum: 0,
            step: 0,
            default_value: 0,
            flags: 0,
            reserved: [0; 2],
        }
    }

    /// Decoded, trimmed control name.
    pub fn name(&self) -> String {
        decode_name(&self.name)
    }

    /// Disabled flag.
    pub const fn is_disabled(&self) -> bool {
        self.flags & CTRL_FLAG_DISABLED != 0
    }

    /// Read-only flag.
    pub const fn is_read_only(&self) -> bool {
        self.flags & CTRL_FLAG_READ_ONLY != 0
    }

    /// Inactive flag.
    pub const fn is_inactive(&self) -> bool {
        self.flags & CTRL_FLAG_INACTIVE != 0
    }
}

/// `struct v4l2_querymenu`
///
/// The 32-byte payload is a union of a NUL-terminated name and a signed
/// 64-bit value; which one applies depends on the control type.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct V4l2Querymenu {
    /// Control id.
    pub id: u32,
    /// Menu index.
    pub index: u32,
    /// Name or value union.
    pub payload: [u8; NAME_LEN],
    /// Reserved, must be zero.
    pub reserved: u32,
}

impl V4l2Querymenu {
    /// A query record for entry `index` of control `id`.
    pub const fn request(id: u32, index: u32) -> Self {
        Self {
            id,
            index,
            payload: [0; NAME_LEN],
            reserved: 0,
        }
    }

    /// Payload read as a trimmed name.
    pub fn name(&self) -> String {
        let payload = self.payload;
        decode_name(&payload)
    }

    /// Payload read as a signed 64-bit value.
    pub const fn value(&self) -> i64 {
        let [b0, b1, b2, b3, b4, b5, b6, b7, ..] = self.payload;
        i64::from_ne_bytes([b0, b1, b2, b3, b4, b5, b6, b7])
    }
}

/// `struct v4l2_control`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4l2Control {
    /// Control id.
    pub id: u32,
    /// Control value.
    pub value: i32,
}

const _: () = assert!(size_of::<V4l2Queryctrl>() == 68);
const _: () = assert!(size_of::<V4l2Querymenu>() == 44);
const _: () = assert!(size_of::<V4l2Control>() == 8);

/// Decode a NUL-terminated buffer, replacing invalid UTF-8 and trimming whitespace.
pub fn decode_name(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    let raw = bytes.get(..len).unwrap_or(bytes);
    String::from_utf8_lossy(raw).trim().to_owned()
}

/// Encode a name into a NUL-terminated buffer, truncating if needed.
#[cfg(test)]
fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut buf = [0; NAME_LEN];
    for (dst, src) in buf.iter_mut().take(NAME_LEN - 1).zip(name.bytes()) {
        *dst = src;
    }
    buf
}

/// Driver-side records for mock nodes.
#[cfg(test)]
impl V4l2Queryctrl {
    /// A description as a driver would return it, with an empty range.
    pub fn describe(id: u32, ctrl_type: u32, name: &str) -> Self {
        Self {
            ctrl_type,
            name: encode_name(name),
            ..Self::request(id)
        }
    }

    /// Set the value range.
    #[must_use]
    pub const fn range(mut self, minimum: i32, maximum: i32, step: i32) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self.step = step;
        self
    }

    /// Set the default value.
    #[must_use]
    pub const fn with_default(mut self, value: i32) -> Self {
        self.default_value = value;
        self
    }

    /// Set the flag bits.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
impl V4l2Querymenu {
    /// A text menu entry.
    pub fn with_name(id: u32, index: u32, name: &str) -> Self {
        Self {
            payload: encode_name(name),
            ..Self::request(id, index)
        }
    }

    /// An integer menu entry.
    pub fn with_value(id: u32, index: u32, value: i64) -> Self {
        let mut payload = [0; NAME_LEN];
        for (dst, src) in payload.iter_mut().zip(value.to_ne_bytes()) {
            *dst = src;
        }
        Self {
            payload,
            ..Self::request(id, index)
        }
    }
}
