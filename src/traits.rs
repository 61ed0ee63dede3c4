//! Core traits and types for camera control discovery.
//!
//! The two hardware channels (kernel video controls and the I2C motor
//! controller) sit behind the traits in this module so that the protocol
//! logic can run against real nodes or against the in-crate mocks.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::capability::Capability;
use crate::codec::{self, V4l2Queryctrl, V4l2Querymenu};

/// Semantic type of a kernel video control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    /// Plain or 64-bit integer.
    Integer,
    /// On/off switch.
    Boolean,
    /// Indexed menu with text labels.
    Menu,
    /// Write-only trigger.
    Button,
    /// Bit field.
    Bitmask,
    /// Indexed menu with 64-bit integer labels.
    IntegerMenu,
}

impl ControlType {
    /// Map a kernel control type tag to its semantic type.
    ///
    /// Control-class markers, string controls and unknown tags map to `None`
    /// since they are not independently actionable.
    pub const fn from_kernel(tag: u32) -> Option<Self> {
        match tag {
            codec::CTRL_TYPE_INTEGER | codec::CTRL_TYPE_INTEGER64 => Some(Self::Integer),
            codec::CTRL_TYPE_BOOLEAN => Some(Self::Boolean),
            codec::CTRL_TYPE_MENU => Some(Self::Menu),
            codec::CTRL_TYPE_BUTTON => Some(Self::Button),
            codec::CTRL_TYPE_BITMASK => Some(Self::Bitmask),
            codec::CTRL_TYPE_INTEGER_MENU => Some(Self::IntegerMenu),
            _ => None,
        }
    }

    /// Whether the control carries a menu-index-to-label mapping.
    pub const fn has_menu(self) -> bool {
        matches!(self, Self::Menu | Self::IntegerMenu)
    }

    /// Lowercase name used in reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Menu => "menu",
            Self::Button => "button",
            Self::Bitmask => "bitmask",
            Self::IntegerMenu => "integer_menu",
        }
    }
}

/// One discovered kernel video control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoControl {
    /// Kernel control identifier.
    pub id: u32,
    /// Human-readable name reported by the driver.
    pub name: String,
    /// Semantic control type.
    pub control_type: ControlType,
    /// Minimum accepted value.
    pub minimum: i32,
    /// Maximum accepted value.
    pub maximum: i32,
    /// Value granularity, always at least 1.
    pub step: i32,
    /// Driver default value.
    pub default_value: i32,
    /// Last known value.
    pub value: i32,
    /// Raw kernel flag bits.
    pub flags: u32,
    /// Device node that owns this control.
    pub device: PathBuf,
    /// Control cannot be written.
    pub read_only: bool,
    /// Control is currently inactive (e.g. overridden by an auto mode).
    pub inactive: bool,
    /// Menu labels by index; empty for non-menu controls.
    pub menu_items: BTreeMap<u32, String>,
}

/// Error type for camera control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A device node could not be opened.
    #[error("device {} unavailable: {source}", path.display())]
    DeviceUnavailable {
        /// Node path.
        path: PathBuf,
        /// Underlying open error.
        #[source]
        source: io::Error,
    },
    /// A control read was refused by the kernel or the control does not exist.
    #[error("query of control {id:#010x} failed: {source}")]
    QueryFailed {
        /// Control identifier.
        id: u32,
        /// Underlying ioctl error.
        #[source]
        source: io::Error,
    },
    /// The control is not present in the current registry snapshot.
    #[error("unknown control {id:#010x}")]
    NotFound {
        /// Control identifier.
        id: u32,
    },
    /// The kernel rejected a control write.
    #[error("failed to set control {id:#010x} to {value}: {source}")]
    SetFailed {
        /// Control identifier.
        id: u32,
        /// Requested value.
        value: i32,
        /// Underlying ioctl error.
        #[source]
        source: io::Error,
    },
    /// A single I2C transaction failed; may succeed on retry.
    #[error("transient I2C error: {0}")]
    BusTransient(#[source] io::Error),
    /// Every retry of an I2C write failed.
    #[error("I2C bus failure after {attempts} attempts, is the camera plugged in?")]
    BusFailure {
        /// Number of attempts made.
        attempts: u32,
    },
    /// No I2C bus is open.
    #[error("I2C bus is not available")]
    BusUnavailable,
    /// The motor controller reported busy (or its status could not be read).
    #[error("motor controller is busy")]
    NotReady,
    /// Requested value lies outside the accepted range.
    #[error("value {value} outside [{minimum}, {maximum}]")]
    OutOfRange {
        /// Requested value.
        value: i64,
        /// Lower bound.
        minimum: i64,
        /// Upper bound.
        maximum: i64,
    },
    /// Requested value is not reachable from the minimum in whole steps.
    #[error("value {value} is not aligned to step {step} from minimum {minimum}")]
    StepMisaligned {
        /// Requested value.
        value: i64,
        /// Control step.
        step: i32,
        /// Control minimum.
        minimum: i32,
    },
    /// The control cannot be written.
    #[error("control '{name}' is read-only")]
    ReadOnly {
        /// Control name.
        name: String,
    },
    /// The detected camera has no such I2C capability.
    #[error("{0} is unsupported by this camera")]
    CapabilityUnsupported(Capability),
    /// A mutating request arrived too soon after the previous one.
    #[error("too many requests")]
    RateLimited,
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Settings could not be encoded or decoded.
    #[error("settings format error: {0}")]
    Settings(#[from] serde_json::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ControlError {
    /// HTTP-style status code for the external command surface.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::ReadOnly { .. } => 403,
            Self::OutOfRange { .. } | Self::StepMisaligned { .. } => 400,
            Self::CapabilityUnsupported(_) => 409,
            Self::RateLimited => 429,
            Self::DeviceUnavailable { .. }
            | Self::QueryFailed { .. }
            | Self::SetFailed { .. }
            | Self::BusTransient(_)
            | Self::BusFailure { .. }
            | Self::BusUnavailable
            | Self::NotReady
            | Self::Config(_)
            | Self::Settings(_)
            | Self::Io(_) => 500,
        }
    }

    /// Whether this is a request-validation rejection (no side effect performed).
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::ReadOnly { .. }
                | Self::OutOfRange { .. }
                | Self::StepMisaligned { .. }
                | Self::CapabilityUnsupported(_)
                | Self::RateLimited
        )
    }
}

/// Result type for camera control operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Raw kernel video-control operations on one open device node.
pub trait ControlHandle {
    /// Issue the query-control operation for `id` (which may carry the next flag).
    fn query_control(&mut self, id: u32) -> io::Result<V4l2Queryctrl>;

    /// Query one menu entry of a menu-type control.
    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<V4l2Querymenu>;

    /// Read the current value of a control.
    fn get_control(&mut self, id: u32) -> io::Result<i32>;

    /// Write the value of a control.
    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;
}

/// Access to the system's kernel video nodes.
pub trait ControlBackend: Send + Sync {
    /// The handle type returned by `open`.
    type Handle: ControlHandle;

    /// List every video device node; order is unspecified.
    fn video_nodes(&self) -> Vec<PathBuf>;

    /// Open a node for the duration of one operation.
    fn open(&self, path: &Path) -> Result<Self::Handle>;
}

/// One open I2C bus bound to the motor-controller address.
pub trait I2cBus: Send {
    /// Read a single byte with no register selection.
    fn read_byte(&mut self) -> Result<u8>;

    /// Read `buf.len()` bytes starting at `register`.
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `register`.
    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()>;

    /// Write one data byte to `register`.
    fn write_byte_data(&mut self, register: u8, value: u8) -> Result<()>;
}

/// Discovery and opening of I2C buses.
pub trait BusOpener: Send + Sync {
    /// The bus type returned by `open`.
    type Bus: I2cBus;

    /// Every I2C bus node as `(bus number, path)`, sorted by path.
    fn bus_nodes(&self) -> Vec<(u32, PathBuf)>;

    /// Open bus `number` and bind it to the 7-bit `address`.
    fn open(&self, number: u32, address: u16) -> Result<Self::Bus>;
}
