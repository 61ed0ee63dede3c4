//! Arducam-Ctl: control of Arducam PTZ and motorized-focus cameras
//!
//! Two hardware channels are combined: kernel video controls reached through
//! raw V4L2 ioctls on `/dev/video*`, and the Arducam motor controller on an
//! I2C bus. The [`service::ControlService`] detects the camera family,
//! reconciles capabilities from both channels, and validates every request
//! before it reaches hardware.
//!
//! Hardware access sits behind traits so the whole stack can be driven by
//! mock devices in tests.

pub mod capability;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod i2c;
pub mod metadata;
pub mod registry;
pub mod report;
pub mod service;
pub mod settings;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capability::{CameraFamily, Capability, CapabilitySet};
pub use client::ControlClient;
pub use config::Config;
pub use device::V4l2Backend;
pub use i2c::{BusEvent, BusTransport, LinuxI2cOpener};
pub use registry::ControlRegistry;
pub use report::CapabilityReport;
pub use service::{start_linux, Command, ControlService, LinuxControlService, Response};
pub use traits::{ControlError, ControlType, Result, VideoControl};
