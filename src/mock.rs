//! Mock hardware for testing without video nodes or an I2C bus.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::codec::{V4l2Queryctrl, V4l2Querymenu, CTRL_FLAG_NEXT_CTRL};
use crate::traits::{BusOpener, ControlBackend, ControlError, ControlHandle, I2cBus, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

/// Scripted controls of one mock video node.
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    controls: BTreeMap<u32, V4l2Queryctrl>,
    values: HashMap<u32, i32>,
    unreadable: HashSet<u32>,
    menus: HashMap<(u32, u32), V4l2Querymenu>,
    write_results: HashMap<u32, i32>,
    failing_writes: HashSet<u32>,
    writes: Vec<(u32, i32)>,
}

impl MockNode {
    /// A node without controls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a control; `None` makes its value unreadable.
    #[must_use]
    pub fn with_control(mut self, desc: V4l2Queryctrl, value: Option<i32>) -> Self {
        match value {
            Some(value) => {
                self.values.insert(desc.id, value);
            }
            None => {
                self.unreadable.insert(desc.id);
            }
        }
        self.controls.insert(desc.id, desc);
        self
    }

    /// Add a menu entry.
    #[must_use]
    pub fn with_menu_item(mut self, item: V4l2Querymenu) -> Self {
        self.menus.insert((item.id, item.index), item);
        self
    }

    /// Make the driver store `actual` whenever control `id` is written.
    #[must_use]
    pub fn with_write_result(mut self, id: u32, actual: i32) -> Self {
        self.write_results.insert(id, actual);
        self
    }

    /// Make writes to control `id` fail.
    #[must_use]
    pub fn with_failing_write(mut self, id: u32) -> Self {
        self.failing_writes.insert(id);
        self
    }
}

#[derive(Debug, Default)]
struct BackendState {
    nodes: BTreeMap<PathBuf, MockNode>,
    unavailable: BTreeSet<PathBuf>,
}

/// Mock set of video nodes sharing state across clones.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    /// A backend without nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    #[must_use]
    pub fn with_node<P: Into<PathBuf>>(self, path: P, node: MockNode) -> Self {
        self.replace_node(path, node);
        self
    }

    /// Add a node that is listed but cannot be opened.
    #[must_use]
    pub fn with_unavailable<P: Into<PathBuf>>(self, path: P) -> Self {
        lock(&self.state).unavailable.insert(path.into());
        self
    }

    /// Install or replace a node after construction.
    pub fn replace_node<P: Into<PathBuf>>(&self, path: P, node: MockNode) {
        lock(&self.state).nodes.insert(path.into(), node);
    }

    /// Remove every node.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.nodes.clear();
        state.unavailable.clear();
    }

    /// Writes issued to `path`, in order.
    pub fn writes(&self, path: &Path) -> Vec<(u32, i32)> {
        lock(&self.state)
            .nodes
            .get(path)
            .map(|node| node.writes.clone())
            .unwrap_or_default()
    }
}

impl ControlBackend for MockBackend {
    type Handle = MockHandle;

    fn video_nodes(&self) -> Vec<PathBuf> {
        let state = lock(&self.state);
        // Reverse order so callers must sort.
        let mut nodes: Vec<PathBuf> = state
            .nodes
            .keys()
            .chain(state.unavailable.iter())
            .cloned()
            .collect();
        nodes.sort();
        nodes.reverse();
        nodes
    }

    fn open(&self, path: &Path) -> Result<MockHandle> {
        let state = lock(&self.state);
        if state.unavailable.contains(path) || !state.nodes.contains_key(path) {
            return Err(ControlError::DeviceUnavailable {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        Ok(MockHandle {
            path: path.to_path_buf(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Open handle onto a [`MockNode`].
#[derive(Debug)]
pub struct MockHandle {
    path: PathBuf,
    state: Arc<Mutex<BackendState>>,
}

impl MockHandle {
    fn with_node<T, F>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(&mut MockNode) -> io::Result<T>,
    {
        let mut state = lock(&self.state);
        let node = state
            .nodes
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;
        f(node)
    }
}

impl ControlHandle for MockHandle {
    fn query_control(&mut self, id: u32) -> io::Result<V4l2Queryctrl> {
        self.with_node(|node| {
            if id & CTRL_FLAG_NEXT_CTRL != 0 {
                let after = id & !CTRL_FLAG_NEXT_CTRL;
                node.controls
                    .values()
                    .find(|desc| after == 0 || desc.id > after)
                    .copied()
                    .ok_or_else(einval)
            } else {
                node.controls.get(&id).copied().ok_or_else(einval)
            }
        })
    }

    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<V4l2Querymenu> {
        self.with_node(|node| node.menus.get(&(id, index)).copied().ok_or_else(einval))
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        self.with_node(|node| {
            if node.unreadable.contains(&id) {
                return Err(io::Error::from_raw_os_error(libc::EACCES));
            }
            node.values.get(&id).copied().ok_or_else(einval)
        })
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        self.with_node(|node| {
            if !node.controls.contains_key(&id) || node.failing_writes.contains(&id) {
                return Err(einval());
            }
            node.writes.push((id, value));
            let stored = node.write_results.get(&id).copied().unwrap_or(value);
            node.values.insert(id, stored);
            Ok(())
        })
    }
}

/// Observable state of a [`MockBus`].
#[derive(Debug, Default)]
struct BusState {
    status: [u8; 2],
    status_readable: bool,
    busy_after_write: bool,
    present: bool,
    failing_attempts: u32,
    write_attempts: u32,
    writes: Vec<(u8, Vec<u8>)>,
}

/// Mock I2C bus sharing state across clones.
#[derive(Debug, Clone)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// A responsive, idle bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                status_readable: true,
                present: true,
                ..BusState::default()
            })),
        }
    }

    /// Nothing answers at the peripheral address.
    #[must_use]
    pub fn absent(self) -> Self {
        {
            let mut state = lock(&self.state);
            state.present = false;
            state.status_readable = false;
            state.failing_attempts = u32::MAX;
        }
        self
    }

    /// Set or clear the busy bit of the status register.
    pub fn set_busy(&self, busy: bool) {
        let mut state = lock(&self.state);
        state.status[1] = if busy { 0x01 } else { 0x00 };
    }

    /// Raise the busy bit after every successful write, as a controller
    /// does while the motor moves.
    pub fn set_busy_after_write(&self) {
        lock(&self.state).busy_after_write = true;
    }

    /// Make status reads fail.
    pub fn set_status_unreadable(&self) {
        lock(&self.state).status_readable = false;
    }

    /// Fail the next `attempts` write attempts.
    pub fn fail_next_writes(&self, attempts: u32) {
        lock(&self.state).failing_attempts = attempts;
    }

    /// Total write attempts, successful or not.
    pub fn write_attempts(&self) -> u32 {
        lock(&self.state).write_attempts
    }

    /// Successful writes as `(first byte, remaining bytes)`.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        lock(&self.state).writes.clone()
    }

    fn attempt_write(&self, register: u8, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        state.write_attempts += 1;
        if state.failing_attempts > 0 {
            state.failing_attempts -= 1;
            return Err(ControlError::BusTransient(io::Error::from_raw_os_error(
                libc::EREMOTEIO,
            )));
        }
        state.writes.push((register, data.to_vec()));
        if state.busy_after_write {
            state.status = [0x00, 0x01];
        }
        Ok(())
    }
}

impl I2cBus for MockBus {
    fn read_byte(&mut self) -> Result<u8> {
        if lock(&self.state).present {
            Ok(0)
        } else {
            Err(ControlError::BusTransient(io::Error::from_raw_os_error(
                libc::EREMOTEIO,
            )))
        }
    }

    fn read_block(&mut self, _register: u8, buf: &mut [u8]) -> Result<()> {
        let state = lock(&self.state);
        if !state.status_readable {
            return Err(ControlError::BusTransient(io::Error::from_raw_os_error(
                libc::EREMOTEIO,
            )));
        }
        for (dst, src) in buf.iter_mut().zip(state.status) {
            *dst = src;
        }
        Ok(())
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()> {
        self.attempt_write(register, data)
    }

    fn write_byte_data(&mut self, register: u8, value: u8) -> Result<()> {
        self.attempt_write(register, &[value])
    }
}

/// Mock set of I2C buses.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    buses: BTreeMap<u32, MockBus>,
    unopenable: BTreeSet<u32>,
}

impl MockOpener {
    /// No buses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bus `number`.
    #[must_use]
    pub fn with_bus(mut self, number: u32, bus: MockBus) -> Self {
        self.buses.insert(number, bus);
        self
    }

    /// Make bus `number` fail to open.
    #[must_use]
    pub fn with_unopenable(mut self, number: u32) -> Self {
        self.unopenable.insert(number);
        self
    }
}

impl BusOpener for MockOpener {
    type Bus = MockBus;

    fn bus_nodes(&self) -> Vec<(u32, PathBuf)> {
        let mut nodes: Vec<(u32, PathBuf)> = self
            .buses
            .keys()
            .map(|&number| (number, PathBuf::from(format!("/dev/i2c-{number}"))))
            .collect();
        nodes.sort_by(|a, b| a.1.cmp(&b.1));
        nodes
    }

    fn open(&self, number: u32, _address: u16) -> Result<MockBus> {
        let path = PathBuf::from(format!("/dev/i2c-{number}"));
        if self.unopenable.contains(&number) {
            return Err(ControlError::DeviceUnavailable {
                path,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        self.buses
            .get(&number)
            .cloned()
            .ok_or_else(|| ControlError::DeviceUnavailable {
                path,
                source: io::Error::from(io::ErrorKind::NotFound),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CTRL_TYPE_INTEGER;

    #[test]
    fn test_mock_backend_lists_nodes_unsorted() {
        let backend = MockBackend::new()
            .with_node("/dev/video0", MockNode::new())
            .with_node("/dev/video1", MockNode::new());
        let nodes = backend.video_nodes();
        assert_eq!(nodes, vec![PathBuf::from("/dev/video1"), PathBuf::from("/dev/video0")]);
    }

    fn boolean_like(id: u32, name: &str) -> V4l2Queryctrl {
        V4l2Queryctrl::describe(id, CTRL_TYPE_INTEGER, name).range(0, 1, 1)
    }

    #[test]
    fn test_mock_next_control_iteration() {
        let backend = MockBackend::new().with_node(
            "/dev/video0",
            MockNode::new()
                .with_control(boolean_like(5, "a"), Some(0))
                .with_control(boolean_like(9, "b"), Some(0)),
        );
        let mut handle = backend.open(Path::new("/dev/video0")).expect("open should succeed");
        let first = handle.query_control(CTRL_FLAG_NEXT_CTRL).expect("first control");
        assert_eq!(first.id, 5);
        let second = handle.query_control(5 | CTRL_FLAG_NEXT_CTRL).expect("second control");
        assert_eq!(second.id, 9);
        assert!(handle.query_control(9 | CTRL_FLAG_NEXT_CTRL).is_err());
    }

    #[test]
    fn test_mock_bus_failure_budget() {
        let mut bus = MockBus::new();
        bus.fail_next_writes(2);
        assert!(bus.write_block(0x05, &[0, 1]).is_err());
        assert!(bus.write_block(0x05, &[0, 1]).is_err());
        assert!(bus.write_block(0x05, &[0, 1]).is_ok());
        assert_eq!(bus.write_attempts(), 3);
        assert_eq!(bus.writes(), vec![(0x05, vec![0, 1])]);
    }

    #[test]
    fn test_mock_bus_busy_after_write() {
        let mut bus = MockBus::new();
        bus.set_busy_after_write();
        let mut status = [0u8; 2];
        bus.read_block(0x04, &mut status).expect("status read");
        assert_eq!(status, [0x00, 0x00]);

        bus.write_block(0x05, &[0, 1]).expect("write");
        bus.read_block(0x04, &mut status).expect("status read");
        assert_eq!(status, [0x00, 0x01]);
    }
}
