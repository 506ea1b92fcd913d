// ==========================================
// SESSION PERSISTENCE
// ==========================================
// Typed key-value store for session settings. Every record carries the
// time it was written; records older than the TTL are discarded (and
// removed) when read.
//
// On-disk layout: one JSON file per key inside the data directory, e.g.
//   ~/.local/share/podplay/playback_session.json
//   {"episode": {...}, "currentTime": 42.0, "volume": 0.8, "playbackSpeed": 1.0, "timestamp": 1700000000000}

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

/// Raw string storage behind the store
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// ==========================================
// FILE STORAGE
// ==========================================
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ==========================================
// MEMORY STORAGE
// ==========================================
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ==========================================
// RECORDS
// ==========================================

/// A stored payload plus the time it was written (milliseconds since epoch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord<T> {
    #[serde(flatten)]
    pub payload: T,
    pub timestamp: i64,
}

impl<T> PersistedRecord<T> {
    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

#[derive(Serialize)]
struct RecordRef<'a, T> {
    #[serde(flatten)]
    payload: &'a T,
    timestamp: i64,
}

#[derive(Clone)]
pub struct PersistenceStore {
    storage: Arc<dyn SessionStorage>,
    ttl: chrono::Duration,
}

impl PersistenceStore {
    pub fn new(storage: Arc<dyn SessionStorage>, ttl: chrono::Duration) -> Self {
        PersistenceStore { storage, ttl }
    }

    /// Memory-backed store with the standard 24h TTL
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), chrono::Duration::hours(24))
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn save<T: Serialize>(&self, key: &str, payload: &T) -> Result<()> {
        self.save_at(key, payload, Utc::now())
    }

    /// Writes `{payload..., timestamp}` stamped with `now`
    pub fn save_at<T: Serialize>(&self, key: &str, payload: &T, now: DateTime<Utc>) -> Result<()> {
        let record = RecordRef {
            payload,
            timestamp: now.timestamp_millis(),
        };
        let json = serde_json::to_string(&record)?;
        self.storage.set(key, &json)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.load_at(key, Utc::now())
    }

    /// Returns the payload if the record is at most one TTL old.
    ///
    /// Expired or unreadable records are cleared and yield `None`.
    pub fn load_at<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read persisted record {}: {}", key, e);
                return None;
            }
        };

        let record: PersistedRecord<T> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Discarding unreadable record {}: {}", key, e);
                self.clear(key);
                return None;
            }
        };

        let age = now.timestamp_millis() - record.timestamp;
        if age > self.ttl.num_milliseconds() {
            tracing::debug!("Record {} expired ({} ms old)", key, age);
            self.clear(key);
            return None;
        }

        Some(record.payload)
    }

    pub fn clear(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            tracing::warn!("Failed to clear persisted record {}: {}", key, e);
        }
    }

    /// Raw access for inspection (and for tests that backdate records)
    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }
}
