use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::errors::WatchError;
use crate::signal::SignalValue;

/// Key/value slots that survive a page reload.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), WatchError>;
    fn remove(&self, key: &str) -> Result<(), WatchError>;
}

/// Lives as long as the process, which for the daemon is one browsing session.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.slots.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WatchError> {
        self.slots
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), WatchError> {
        self.slots.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

fn poisoned() -> WatchError {
    WatchError::Storage {
        message: "store lock poisoned".to_string(),
    }
}

/// JSON map on disk, rewritten through a temp file on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    slots: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens `path`, starting empty when it does not exist or is unreadable.
    pub fn open(path: &Path) -> Result<Self, WatchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_io)?;
        }

        let slots = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(
                    event = "storage.file_corrupt",
                    path = %path.display(),
                    error = %e
                );
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(storage_io(e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            slots: Mutex::new(slots),
        })
    }

    fn flush(&self, slots: &HashMap<String, String>) -> Result<(), WatchError> {
        let content = serde_json::to_string_pretty(slots).map_err(|e| WatchError::Storage {
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(storage_io)?;
        fs::rename(&tmp, &self.path).map_err(storage_io)?;
        Ok(())
    }
}

fn storage_io(e: std::io::Error) -> WatchError {
    WatchError::Storage {
        message: e.to_string(),
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.slots.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WatchError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        slots.insert(key.to_string(), value.to_string());
        self.flush(&slots)
    }

    fn remove(&self, key: &str) -> Result<(), WatchError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        if slots.remove(key).is_some() {
            self.flush(&slots)?;
        }
        Ok(())
    }
}

/// What the last-value slot holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObservation {
    pub value: SignalValue,
    pub observed_at: DateTime<Utc>,
}

pub fn save_last_value(
    store: &dyn SessionStore,
    key: &str,
    value: &SignalValue,
) -> Result<(), WatchError> {
    let observation = StoredObservation {
        value: value.clone(),
        observed_at: Utc::now(),
    };
    let json = serde_json::to_string(&observation).map_err(|e| WatchError::Storage {
        message: e.to_string(),
    })?;
    store.set(key, &json)
}

pub fn load_last_value(store: &dyn SessionStore, key: &str) -> Option<StoredObservation> {
    let raw = store.get(key)?;
    serde_json::from_str(&raw).ok()
}

pub fn save_scroll_offset(store: &dyn SessionStore, key: &str, offset: f64) -> Result<(), WatchError> {
    store.set(key, &offset.to_string())
}

/// Read the pending scroll offset once and clear the slot.
///
/// A slot that cannot be cleared is logged; the offset is still returned.
pub fn take_scroll_offset(store: &dyn SessionStore, key: &str) -> Option<f64> {
    let raw = store.get(key)?;
    let offset = raw.trim().parse::<f64>().ok();
    if let Err(e) = store.remove(key) {
        warn!(event = "storage.scroll_clear_failed", key = key, error = %e);
    }
    offset
}
