//! Camera control service: owns every piece of runtime state and dispatches
//! commands against it.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::capability::{
    capabilities_for, detect_family, refine, CameraFamily, Capability, CapabilitySet, Detection,
};
use crate::client::ControlClient;
use crate::config::Config;
use crate::device::V4l2Backend;
use crate::i2c::{ptz_position, BusEvent, BusTransport, LinuxI2cOpener};
use crate::metadata::{run_probe, MetadataEntry, MetadataProbe, ProbeStatus, V4lCapsProbe};
use crate::registry::{ControlRegistry, Snapshot};
use crate::report::{CapabilityReport, ControlReport, Diagnostics};
use crate::settings::{FocusStore, JsonSettings};
use crate::traits::{BusOpener, ControlBackend, ControlError, Result};
use crate::validation::{validate_write, RateLimiter};

/// A request to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Write a kernel video control.
    SetControl {
        /// Control identifier.
        id: u32,
        /// Requested value.
        value: i64,
    },
    /// Drive an I2C axis.
    Ptz {
        /// Axis to move.
        capability: Capability,
        /// Requested position.
        value: i64,
    },
    /// Current capability report.
    Capabilities,
    /// Live read of a kernel video control.
    GetControl {
        /// Control identifier.
        id: u32,
    },
    /// Stored focus level.
    GetFocus,
    /// Legacy numeric family id.
    GetId,
    /// Re-probe video nodes and recompute capabilities.
    Refresh,
}

impl Command {
    /// Whether the command changes hardware state and is rate limited.
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::SetControl { .. } | Self::Ptz { .. })
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Capability report.
    Report(Box<CapabilityReport>),
    /// Value of a kernel control.
    Value {
        /// Control identifier.
        control_id: u32,
        /// Value read from the driver.
        value: i32,
    },
    /// Stored focus level.
    Focus(i32),
    /// Legacy numeric family id.
    Id(&'static str),
    /// The command was carried out.
    Done,
}

/// Service over the real kernel interfaces.
pub type LinuxControlService = ControlService<V4l2Backend, LinuxI2cOpener>;

/// Start a service on the system's video and I2C nodes.
pub fn start_linux(config: &Config) -> LinuxControlService {
    let opener = LinuxI2cOpener::new(config.i2c_dev_dir.clone());
    let store = JsonSettings::new(config.settings_path.clone(), config.default_focus_level);
    ControlService::start(
        config,
        V4l2Backend,
        opener,
        Box::new(store),
        Some(Box::new(V4lCapsProbe)),
    )
}

/// Owned runtime state of the camera control service.
///
/// All operations take `&self`; the service is shared through an `Arc`.
pub struct ControlService<C: ControlBackend, O: BusOpener> {
    client: ControlClient<C>,
    registry: ControlRegistry,
    opener: O,
    transport: BusTransport<O::Bus>,
    family: CameraFamily,
    bus_number: Option<u32>,
    capabilities: RwLock<CapabilitySet>,
    limiter: RateLimiter,
    store: Box<dyn FocusStore>,
    metadata: Vec<MetadataEntry>,
    metadata_status: ProbeStatus,
}

impl<C: ControlBackend, O: BusOpener> ControlService<C, O> {
    /// Run the startup sequence.
    ///
    /// The metadata probe runs first, while no other component holds the
    /// camera. Then the I2C family is detected and its bus opened (an open
    /// failure downgrades the family to none), the video nodes are probed and
    /// the capabilities refined. The lens is not moved; a long-running host
    /// calls [`Self::restore_focus`] once after starting.
    pub fn start(
        config: &Config,
        backend: C,
        opener: O,
        store: Box<dyn FocusStore>,
        probe: Option<Box<dyn MetadataProbe>>,
    ) -> Self {
        let (metadata_status, metadata) = match probe {
            Some(probe) => run_probe(probe, config.metadata_probe_timeout()),
            None => (ProbeStatus::Skipped, Vec::new()),
        };

        let Detection { mut family, bus } =
            detect_family(&opener, config.ptz_bus, config.i2c_address);
        let handle = match bus {
            Some(number) if family != CameraFamily::None => {
                match opener.open(number, config.i2c_address) {
                    Ok(handle) => {
                        info!(family = %family, bus = number, "Arducam I2C camera");
                        Some(handle)
                    }
                    Err(err) => {
                        error!(bus = number, %err, "Failed to open I2C bus");
                        family = CameraFamily::None;
                        None
                    }
                }
            }
            _ => {
                warn!("No Arducam I2C camera detected, PTZ controls disabled");
                None
            }
        };

        let service = Self {
            client: ControlClient::new(backend),
            registry: ControlRegistry::new(),
            opener,
            transport: BusTransport::new(handle, config.max_write_retries),
            family,
            bus_number: bus,
            capabilities: RwLock::new(capabilities_for(family)),
            limiter: RateLimiter::new(config.rate_limit()),
            store,
            metadata,
            metadata_status,
        };

        service.refresh_capabilities();
        service
    }

    /// Execute `command` now.
    pub fn execute(&self, command: Command) -> Result<Response> {
        self.execute_at(Instant::now(), command)
    }

    /// Execute `command` as if it arrived at `now`.
    pub fn execute_at(&self, now: Instant, command: Command) -> Result<Response> {
        let result = match command {
            Command::SetControl { id, value } => self.set_control(now, id, value),
            Command::Ptz { capability, value } => self.ptz(now, capability, value),
            Command::Capabilities => Ok(Response::Report(Box::new(self.report()))),
            Command::GetControl { id } => self.get_control(id),
            Command::GetFocus => Ok(Response::Focus(self.store.focus_level())),
            Command::GetId => Ok(Response::Id(self.family.legacy_id())),
            Command::Refresh => {
                self.refresh_capabilities();
                Ok(Response::Report(Box::new(self.report())))
            }
        };
        if let Err(err) = &result {
            if err.is_rejection() {
                debug!(?command, %err, "Command rejected");
            } else {
                warn!(?command, %err, "Command failed");
            }
        }
        result
    }

    fn set_control(&self, now: Instant, id: u32, value: i64) -> Result<Response> {
        let (control, value) = self.limiter.admit(now, || {
            let control = self.registry.find(id).ok_or(ControlError::NotFound { id })?;
            validate_write(&control, value)?;
            let value = i32::try_from(value).map_err(|_| ControlError::OutOfRange {
                value,
                minimum: i64::from(control.minimum),
                maximum: i64::from(control.maximum),
            })?;
            Ok((control, value))
        })?;

        self.client.set_value(&control.device, id, value)?;
        let actual = self
            .client
            .get_value(&control.device, id)
            .unwrap_or_else(|err| {
                debug!(id, %err, "Read-back failed, assuming requested value");
                value
            });
        self.registry.update_value(id, actual);
        info!(control = %control.name, requested = value, actual, "V4L2 control set");

        Ok(Response::Value {
            control_id: id,
            value: actual,
        })
    }

    fn get_control(&self, id: u32) -> Result<Response> {
        let control = self.registry.find(id).ok_or(ControlError::NotFound { id })?;
        let value = self.client.get_value(&control.device, id)?;
        Ok(Response::Value {
            control_id: id,
            value,
        })
    }

    fn ptz(&self, now: Instant, capability: Capability, value: i64) -> Result<Response> {
        self.limiter.admit(now, || {
            if !self.capabilities().contains(&capability) {
                return Err(ControlError::CapabilityUnsupported(capability));
            }
            // Motorized focus clamps instead of rejecting.
            if self.family == CameraFamily::Ptz {
                ptz_position(value)?;
            }
            Ok(())
        })?;

        if capability == Capability::Focus {
            let accepted = self.drive_focus(value)?;
            self.persist_focus(accepted);
        } else {
            self.drive_axis(capability, value)?;
        }
        Ok(Response::Done)
    }

    fn drive_axis(&self, capability: Capability, value: i64) -> Result<()> {
        match self.family {
            CameraFamily::Ptz => self.transport.write_ptz(capability, value),
            CameraFamily::Motorized | CameraFamily::None => {
                Err(ControlError::CapabilityUnsupported(capability))
            }
        }
    }

    /// Move the lens and return the position actually sent.
    fn drive_focus(&self, value: i64) -> Result<i64> {
        match self.family {
            CameraFamily::Ptz => {
                self.transport.write_ptz(Capability::Focus, value)?;
                Ok(value)
            }
            CameraFamily::Motorized => {
                let position = self.transport.write_motorized_focus(value)?;
                Ok(i64::from(position))
            }
            CameraFamily::None => Err(ControlError::CapabilityUnsupported(Capability::Focus)),
        }
    }

    fn persist_focus(&self, level: i64) {
        let saved = i32::try_from(level)
            .map_err(|_| ControlError::Config(format!("focus level {level} out of range")))
            .and_then(|level| self.store.set_focus_level(level));
        if let Err(err) = saved {
            warn!(level, %err, "Could not persist focus level");
        }
    }

    /// Drive the lens to the stored focus level.
    ///
    /// Does nothing without an open bus or a focus capability. Failures are
    /// logged; the stored level is left unchanged.
    pub fn restore_focus(&self) {
        if !self.transport.is_open() || !self.capabilities().contains(&Capability::Focus) {
            return;
        }
        let level = self.store.focus_level();
        info!(level, "Restoring focus");
        if let Err(err) = self.drive_focus(i64::from(level)) {
            warn!(level, %err, "Focus restore failed");
        }
    }

    /// Re-probe video nodes and recompute capabilities from the family base.
    pub fn refresh_capabilities(&self) -> Snapshot {
        let snapshot = self.registry.probe_all(&self.client);
        let refined = refine(&capabilities_for(self.family), &snapshot);
        debug!(capabilities = ?refined, "I2C capabilities refined");
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = refined;
        snapshot
    }

    /// Current capability report.
    pub fn report(&self) -> CapabilityReport {
        let controls = self.registry.snapshot();
        CapabilityReport {
            camera_type: self.family,
            i2c_capabilities: self.sorted_capabilities(),
            v4l2_controls: controls.iter().map(ControlReport::from).collect(),
            libcamera_controls: self.metadata.clone(),
            diagnostics: self.diagnostics(&controls),
        }
    }

    fn sorted_capabilities(&self) -> Vec<Capability> {
        let mut names: Vec<Capability> = self.capabilities().into_iter().collect();
        names.sort_by_key(|cap| cap.as_str());
        names
    }

    fn diagnostics(&self, controls: &Snapshot) -> Diagnostics {
        let i2c_bus_paths: Vec<PathBuf> = self
            .opener
            .bus_nodes()
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        let mut video_device_paths = self.client.backend().video_nodes();
        video_device_paths.sort();

        Diagnostics {
            i2c_buses_found: i2c_bus_paths.len(),
            i2c_bus_paths,
            video_devices_found: video_device_paths.len(),
            video_device_paths,
            camera_type: self.family,
            i2c_bus_number: self.bus_number,
            i2c_capabilities_count: self.capabilities().len(),
            v4l2_controls_count: controls.len(),
            libcamera_controls_count: self.metadata.len(),
            libcamera_probe_status: self.metadata_status,
        }
    }

    /// Detected camera family.
    pub const fn family(&self) -> CameraFamily {
        self.family
    }

    /// Bus the family was detected on.
    pub const fn bus_number(&self) -> Option<u32> {
        self.bus_number
    }

    /// Currently enabled I2C capabilities.
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The control registry.
    pub const fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    /// Outcome of the startup metadata probe.
    pub const fn metadata_status(&self) -> ProbeStatus {
        self.metadata_status
    }

    /// Receive bus health notifications.
    pub fn subscribe(&self) -> Receiver<BusEvent> {
        self.transport.subscribe()
    }

    /// Close the I2C bus. Returns `false` if it was already closed.
    pub fn shutdown(&self) -> bool {
        self.transport.close()
    }
}
