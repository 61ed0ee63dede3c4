//! Persisted focus position.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::traits::Result;

/// Storage for the last accepted focus position.
pub trait FocusStore: Send + Sync {
    /// Stored focus level, or the default if none was stored.
    fn focus_level(&self) -> i32;

    /// Persist a new focus level.
    fn set_focus_level(&self, level: i32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Settings {
    focus_level: i32,
}

/// Focus level kept in a small JSON file.
#[derive(Debug)]
pub struct JsonSettings {
    path: PathBuf,
    default_level: i32,
    cached: Mutex<Option<i32>>,
}

impl JsonSettings {
    /// Settings stored at `path`, falling back to `default_level`.
    pub fn new<P: Into<PathBuf>>(path: P, default_level: i32) -> Self {
        Self {
            path: path.into(),
            default_level,
            cached: Mutex::new(None),
        }
    }

    /// File backing these settings.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<i32> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), %err, "Settings unreadable");
                }
                return None;
            }
        };
        match serde_json::from_str::<Settings>(&text) {
            Ok(settings) => Some(settings.focus_level),
            Err(err) => {
                debug!(path = %self.path.display(), %err, "Settings malformed");
                None
            }
        }
    }
}

impl FocusStore for JsonSettings {
    fn focus_level(&self) -> i32 {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached.get_or_insert_with(|| self.read().unwrap_or(self.default_level))
    }

    fn set_focus_level(&self, level: i32) -> Result<()> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&Settings { focus_level: level })?;
        fs::write(&self.path, text)?;
        *cached = Some(level);
        Ok(())
    }
}

/// Focus level held in memory only.
#[derive(Debug)]
pub struct MemorySettings {
    level: Mutex<i32>,
}

impl MemorySettings {
    /// Start at `level`.
    pub const fn new(level: i32) -> Self {
        Self {
            level: Mutex::new(level),
        }
    }
}

impl FocusStore for MemorySettings {
    fn focus_level(&self) -> i32 {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_focus_level(&self, level: i32) -> Result<()> {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = level;
        Ok(())
    }
}
