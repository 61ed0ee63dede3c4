//! I2C transport to the Arducam motor controller.
//!
//! Two wire encodings share one transport:
//!
//! - PTZ cameras expose named registers; each axis takes a big-endian
//!   16-bit value written as a two-byte block.
//! - Motorized (focus-only) lens actuators take a 10-bit DAC position packed
//!   into two bytes with no register address; the first byte travels in the
//!   register slot of a byte-data write.
//!
//! The controller firmware cannot tolerate interleaved transactions, so one
//! mutex guards every bus access, including a readiness check and the write
//! that follows it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::capability::Capability;
use crate::traits::{BusOpener, ControlError, I2cBus, Result};

/// 7-bit address of the motor controller.
pub const DEFAULT_ADDRESS: u16 = 0x0C;

/// Zoom position register.
pub const REG_ZOOM: u8 = 0x00;
/// Focus position register.
pub const REG_FOCUS: u8 = 0x01;
/// Two-byte status block; bit 0 of the second byte is set while busy.
pub const REG_STATUS: u8 = 0x04;
/// Pan position register.
pub const REG_PAN: u8 = 0x05;
/// Tilt position register.
pub const REG_TILT: u8 = 0x06;
/// IR-cut filter register.
pub const REG_IRCUT: u8 = 0x0C;

/// Attempts per logical write before giving up.
pub const MAX_WRITE_RETRIES: u32 = 10;

/// Accepted DAC range of the motorized focus actuator.
pub const MOTORIZED_FOCUS_MIN: i64 = 100;
/// Upper bound of the motorized focus range.
pub const MOTORIZED_FOCUS_MAX: i64 = 1000;

/// `I2C_SLAVE` from `linux/i2c-dev.h`.
const I2C_SLAVE: libc::c_ulong = 0x0703;
/// `I2C_RDWR` from `linux/i2c-dev.h`.
const I2C_RDWR: libc::c_ulong = 0x0707;
/// Read direction flag of a message.
const I2C_M_RD: u16 = 0x0001;

/// `struct i2c_msg`, read by the kernel only.
#[repr(C)]
#[allow(dead_code)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

/// `struct i2c_rdwr_ioctl_data`
#[repr(C)]
#[allow(dead_code)]
struct I2cRdwrData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

const _: () = assert!(size_of::<I2cMsg>() == 8 + size_of::<*mut u8>());

/// Register holding the position of a PTZ axis.
pub const fn register_for(capability: Capability) -> u8 {
    match capability {
        Capability::Pan => REG_PAN,
        Capability::Tilt => REG_TILT,
        Capability::Zoom => REG_ZOOM,
        Capability::Focus => REG_FOCUS,
        Capability::Ircut => REG_IRCUT,
    }
}

/// A PTZ register position; values outside `0..=u16::MAX` are rejected.
pub fn ptz_position(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| ControlError::OutOfRange {
        value,
        minimum: 0,
        maximum: i64::from(u16::MAX),
    })
}

/// Big-endian payload of a PTZ register write.
pub const fn ptz_payload(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Clamp a requested focus position into the actuator's range.
pub fn clamp_motorized(value: i64) -> u16 {
    let clamped = value.clamp(MOTORIZED_FOCUS_MIN, MOTORIZED_FOCUS_MAX);
    u16::try_from(clamped).unwrap_or(0)
}

/// The 10-bit DAC field, pre-shifted into bits 4..14.
pub const fn motorized_field(position: u16) -> u16 {
    (position << 4) & 0x3FF0
}

/// The two bytes sent to the actuator for `position`.
#[allow(clippy::cast_possible_truncation)]
pub const fn motorized_bytes(position: u16) -> [u8; 2] {
    let field = motorized_field(position);
    [((field >> 8) & 0x3F) as u8, (field & 0xF0) as u8]
}

/// Notification about bus health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A write exhausted its retry budget.
    BusFailure {
        /// Register or first byte of the failed write.
        register: u8,
        /// Attempts made.
        attempts: u32,
    },
    /// An operation was requested with no bus open.
    BusUnavailable,
}

/// Serialized, retrying access to the motor controller.
#[derive(Debug)]
pub struct BusTransport<B> {
    bus: Mutex<Option<B>>,
    max_retries: u32,
    subscribers: Mutex<Vec<Sender<BusEvent>>>,
}

impl<B: I2cBus> BusTransport<B> {
    /// Wrap an open bus, or `None` if no peripheral was found.
    pub fn new(bus: Option<B>, max_retries: u32) -> Self {
        Self {
            bus: Mutex::new(bus),
            max_retries: max_retries.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Whether a bus is open.
    pub fn is_open(&self) -> bool {
        self.lock_bus().is_some()
    }

    /// Close the bus. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.lock_bus().take().is_some();
        if closed {
            info!("I2C bus closed");
        }
        closed
    }

    /// Receive bus health notifications.
    pub fn subscribe(&self) -> Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Whether the controller is idle.
    pub fn is_ready(&self) -> bool {
        let mut guard = self.lock_bus();
        guard.as_mut().is_some_and(|bus| Self::ready(bus))
    }

    /// Move a PTZ axis: readiness check, then a retried block write, under
    /// one lock acquisition. A busy controller is never written to.
    pub fn write_ptz(&self, capability: Capability, value: i64) -> Result<()> {
        let value = ptz_position(value)?;
        let register = register_for(capability);

        let mut guard = self.lock_bus();
        let bus = self.require_bus(&mut guard)?;
        if !Self::ready(bus) {
            debug!(capability = %capability, "Motor controller busy, command dropped");
            return Err(ControlError::NotReady);
        }
        let payload = ptz_payload(value);
        self.retry(register, || bus.write_block(register, &payload))?;
        debug!(capability = %capability, value, "PTZ register written");
        Ok(())
    }

    /// Move the motorized focus actuator. Returns the clamped position sent.
    pub fn write_motorized_focus(&self, value: i64) -> Result<u16> {
        let position = clamp_motorized(value);
        if i64::from(position) != value {
            warn!(requested = value, position, "Motorized focus clamped");
        }
        let [first, second] = motorized_bytes(position);

        let mut guard = self.lock_bus();
        let bus = self.require_bus(&mut guard)?;
        self.retry(first, || bus.write_byte_data(first, second))?;
        debug!(position, "Motorized focus written");
        Ok(position)
    }

    /// Retried block write to `register`.
    pub fn write_block(&self, register: u8, data: &[u8]) -> Result<()> {
        let mut guard = self.lock_bus();
        let bus = self.require_bus(&mut guard)?;
        self.retry(register, || bus.write_block(register, data))
    }

    /// Retried single-byte write.
    pub fn write_byte(&self, register: u8, value: u8) -> Result<()> {
        let mut guard = self.lock_bus();
        let bus = self.require_bus(&mut guard)?;
        self.retry(register, || bus.write_byte_data(register, value))
    }

    fn ready(bus: &mut B) -> bool {
        let mut status = [0u8; 2];
        match bus.read_block(REG_STATUS, &mut status) {
            Ok(()) => {
                let [_, flags] = status;
                flags & 0x01 == 0
            }
            Err(err) => {
                debug!(%err, "Status read failed");
                false
            }
        }
    }

    fn retry<F>(&self, register: u8, mut op: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        for attempt in 1..=self.max_retries {
            match op() {
                Ok(()) => return Ok(()),
                Err(err) => debug!(register, attempt, %err, "I2C write failed"),
            }
        }
        error!(
            register,
            attempts = self.max_retries,
            "I2C bus failure, is the camera plugged in?"
        );
        self.notify(&BusEvent::BusFailure {
            register,
            attempts: self.max_retries,
        });
        Err(ControlError::BusFailure {
            attempts: self.max_retries,
        })
    }

    fn require_bus<'a>(&self, guard: &'a mut MutexGuard<'_, Option<B>>) -> Result<&'a mut B> {
        if guard.is_none() {
            warn!("I2C bus is not available");
            self.notify(&BusEvent::BusUnavailable);
        }
        guard.as_mut().ok_or(ControlError::BusUnavailable)
    }

    fn notify(&self, event: &BusEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock_bus(&self) -> MutexGuard<'_, Option<B>> {
        lock(&self.bus)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A `/dev/i2c-N` character device bound to one peripheral address.
#[derive(Debug)]
pub struct LinuxI2cBus {
    file: File,
    address: u16,
}

impl LinuxI2cBus {
    /// Open `path` and select `address` for all following transfers.
    pub fn open(path: &Path, address: u16) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ControlError::DeviceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        set_slave_address(&file, address).map_err(|source| ControlError::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { file, address })
    }
}

#[allow(unsafe_code)]
fn set_slave_address(file: &File, address: u16) -> io::Result<()> {
    // SAFETY: I2C_SLAVE takes the address by value; no memory is shared.
    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(address),
        )
    };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Write `register` and read `buf` back in one transaction, with a repeated
/// start between the two messages.
#[allow(unsafe_code)]
fn combined_read(file: &File, address: u16, register: u8, buf: &mut [u8]) -> io::Result<()> {
    let len = u16::try_from(buf.len()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut register = [register];
    let mut msgs = [
        I2cMsg {
            addr: address,
            flags: 0,
            len: 1,
            buf: register.as_mut_ptr(),
        },
        I2cMsg {
            addr: address,
            flags: I2C_M_RD,
            len,
            buf: buf.as_mut_ptr(),
        },
    ];
    let mut data = I2cRdwrData {
        msgs: msgs.as_mut_ptr(),
        nmsgs: 2,
    };
    // SAFETY: every message points at a live buffer of exactly `len` bytes,
    // and `msgs`, `register` and `buf` outlive the call.
    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_RDWR as _,
            std::ptr::addr_of_mut!(data),
        )
    };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl I2cBus for LinuxI2cBus {
    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.file
            .read_exact(&mut byte)
            .map_err(ControlError::BusTransient)?;
        let [value] = byte;
        Ok(value)
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        combined_read(&self.file, self.address, register, buf).map_err(ControlError::BusTransient)
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(register);
        frame.extend_from_slice(data);
        self.file
            .write_all(&frame)
            .map_err(ControlError::BusTransient)
    }

    fn write_byte_data(&mut self, register: u8, value: u8) -> Result<()> {
        self.file
            .write_all(&[register, value])
            .map_err(ControlError::BusTransient)
    }
}

/// The system's I2C bus nodes.
#[derive(Debug, Clone)]
pub struct LinuxI2cOpener {
    dev_dir: PathBuf,
}

impl Default for LinuxI2cOpener {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl LinuxI2cOpener {
    /// Look for `i2c-N` nodes under `dev_dir`.
    pub fn new<P: Into<PathBuf>>(dev_dir: P) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }
}

impl BusOpener for LinuxI2cOpener {
    type Bus = LinuxI2cBus;

    fn bus_nodes(&self) -> Vec<(u32, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.dev_dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("i2c-"))
            })
            .collect();
        paths.sort();
        paths
            .into_iter()
            .filter_map(|path| bus_number(&path).map(|number| (number, path)))
            .collect()
    }

    fn open(&self, number: u32, address: u16) -> Result<LinuxI2cBus> {
        LinuxI2cBus::open(&self.dev_dir.join(format!("i2c-{number}")), address)
    }
}

/// Trailing numeral of an `i2c-N` node name.
pub fn bus_number(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .rsplit_once('-')
        .and_then(|(_, number)| number.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;

    fn transport(bus: &MockBus) -> BusTransport<MockBus> {
        BusTransport::new(Some(bus.clone()), MAX_WRITE_RETRIES)
    }

    #[test]
    fn test_register_map() {
        assert_eq!(register_for(Capability::Zoom), 0x00);
        assert_eq!(register_for(Capability::Focus), 0x01);
        assert_eq!(register_for(Capability::Pan), 0x05);
        assert_eq!(register_for(Capability::Tilt), 0x06);
        assert_eq!(register_for(Capability::Ircut), 0x0C);
    }

    #[test]
    fn test_motorized_encoding() {
        assert_eq!(motorized_field(1000), (1000 << 4) & 0x3FF0);
        assert_eq!(clamp_motorized(50), 100);
        assert_eq!(clamp_motorized(5000), 1000);
        assert_eq!(clamp_motorized(512), 512);

        // 512 << 4 = 0x2000
        assert_eq!(motorized_bytes(512), [0x20, 0x00]);
        // 1000 << 4 = 0x3E80
        assert_eq!(motorized_bytes(1000), [0x3E, 0x80]);
    }

    #[test]
    fn test_ptz_write_is_big_endian_block() {
        let bus = MockBus::new();
        transport(&bus)
            .write_ptz(Capability::Pan, 0x1234)
            .expect("pan should succeed");
        assert_eq!(bus.writes(), vec![(REG_PAN, vec![0x12, 0x34])]);
    }

    #[test]
    fn test_busy_controller_is_never_written() {
        let bus = MockBus::new();
        bus.set_busy(true);
        let err = transport(&bus)
            .write_ptz(Capability::Pan, 100)
            .expect_err("busy controller should refuse");
        assert!(matches!(err, ControlError::NotReady));
        assert_eq!(bus.write_attempts(), 0);
    }

    #[test]
    fn test_readiness_and_write_share_one_lock() {
        let bus = MockBus::new();
        bus.set_busy_after_write();
        let transport = transport(&bus);
        let shared = &transport;

        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let writers: Vec<_> = [Capability::Pan, Capability::Tilt]
                .into_iter()
                .map(|capability| scope.spawn(move || shared.write_ptz(capability, 100)))
                .collect();
            writers
                .into_iter()
                .filter_map(|writer| writer.join().ok())
                .collect()
        });

        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ControlError::NotReady))));
        assert_eq!(bus.write_attempts(), 1);
        assert_eq!(bus.writes().len(), 1);
    }

    #[test]
    fn test_unreadable_status_counts_as_busy() {
        let bus = MockBus::new();
        bus.set_status_unreadable();
        let transport = transport(&bus);
        assert!(!transport.is_ready());
        assert!(transport.write_ptz(Capability::Tilt, 1).is_err());
        assert_eq!(bus.write_attempts(), 0);
    }

    #[test]
    fn test_retry_succeeds_within_budget() {
        for failures in 0..MAX_WRITE_RETRIES {
            let bus = MockBus::new();
            bus.fail_next_writes(failures);
            transport(&bus)
                .write_ptz(Capability::Zoom, 7)
                .expect("write within budget should succeed");
            assert_eq!(bus.write_attempts(), failures + 1);
        }
    }

    #[test]
    fn test_retry_exhaustion_reports_and_notifies() {
        let bus = MockBus::new();
        bus.fail_next_writes(MAX_WRITE_RETRIES);
        let transport = transport(&bus);
        let events = transport.subscribe();

        let err = transport
            .write_ptz(Capability::Zoom, 7)
            .expect_err("write should fail");
        assert!(matches!(err, ControlError::BusFailure { attempts: 10 }));
        assert_eq!(bus.write_attempts(), MAX_WRITE_RETRIES);
        assert_eq!(
            events.try_recv().ok(),
            Some(BusEvent::BusFailure {
                register: REG_ZOOM,
                attempts: 10
            })
        );
    }

    #[test]
    fn test_motorized_focus_bytes_and_clamp() {
        let bus = MockBus::new();
        bus.set_busy(true);
        let position = transport(&bus)
            .write_motorized_focus(50)
            .expect("focus should succeed");
        assert_eq!(position, 100);
        // 100 << 4 = 0x0640
        assert_eq!(bus.writes(), vec![(0x06, vec![0x40])]);
    }

    #[test]
    fn test_ptz_position_bounds() {
        assert_eq!(ptz_position(0).ok(), Some(0));
        assert_eq!(ptz_position(65_535).ok(), Some(u16::MAX));
        assert!(matches!(
            ptz_position(-1),
            Err(ControlError::OutOfRange { minimum: 0, maximum: 65_535, .. })
        ));
    }

    #[test]
    fn test_ptz_value_outside_u16_is_rejected() {
        let bus = MockBus::new();
        let err = transport(&bus)
            .write_ptz(Capability::Focus, 70_000)
            .expect_err("value should be rejected");
        assert!(matches!(err, ControlError::OutOfRange { .. }));
        assert_eq!(bus.write_attempts(), 0);
    }

    #[test]
    fn test_closed_bus_is_unavailable() {
        let bus = MockBus::new();
        let transport = transport(&bus);
        let events = transport.subscribe();
        assert!(transport.close());
        assert!(!transport.close());

        let err = transport
            .write_byte(REG_IRCUT, 1)
            .expect_err("closed bus should fail");
        assert!(matches!(err, ControlError::BusUnavailable));
        assert_eq!(events.try_recv().ok(), Some(BusEvent::BusUnavailable));
    }

    #[test]
    fn test_status_read_is_one_transaction() {
        let node = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(node.path(), [0x00, 0xAA, 0xBB]).expect("seed");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(node.path())
            .expect("reopen");
        let mut bus = LinuxI2cBus {
            file,
            address: DEFAULT_ADDRESS,
        };

        // Regular files reject I2C_RDWR; a split write and read would not.
        let mut status = [0u8; 2];
        let err = bus
            .read_block(REG_STATUS, &mut status)
            .expect_err("regular file should refuse I2C_RDWR");
        assert!(matches!(err, ControlError::BusTransient(_)));
        assert_eq!(status, [0, 0]);
    }

    #[test]
    fn test_bus_number_parsing() {
        assert_eq!(bus_number(Path::new("/dev/i2c-1")), Some(1));
        assert_eq!(bus_number(Path::new("/dev/i2c-22")), Some(22));
        assert_eq!(bus_number(Path::new("/dev/i2c-x")), None);
    }

    #[test]
    fn test_linux_opener_lists_sorted_nodes() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["i2c-10", "i2c-2", "i2c-1", "video0", "i2c-bad"] {
            File::create(dir.path().join(name)).expect("create node");
        }
        let opener = LinuxI2cOpener::new(dir.path());
        let numbers: Vec<u32> = opener.bus_nodes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![1, 10, 2]);
    }
}
