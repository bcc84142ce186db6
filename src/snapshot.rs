//! Single-writer JSON documents
//!
//! Stats and the anomaly set are stored as whole JSON values. A write goes
//! to a temporary file that is synced and then renamed over the target, so
//! a reader sees either the previous value or the new one, never a mix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum SnapshotError {
    Missing(PathBuf),
    Corrupt { path: PathBuf, reason: String },
    Io(io::Error),
    Serialization(serde_json::Error),
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err)
    }
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Missing(path) => write!(f, "Datastore not found: {}", path.display()),
            SnapshotError::Corrupt { path, reason } => {
                write!(f, "Invalid data in datastore {}: {}", path.display(), reason)
            }
            SnapshotError::Io(e) => write!(f, "IO error: {}", e),
            SnapshotError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Write `value` as pretty JSON to `path`, replacing any previous content atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let json = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Read a JSON document, distinguishing a missing file from an unreadable one
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SnapshotError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(SnapshotError::Io(e)),
    };

    serde_json::from_slice(&raw).map_err(|e| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// A JSON document with exactly one writer at a time
pub struct JsonSnapshot<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonSnapshot<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _value: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub async fn load(&self) -> Result<T, SnapshotError> {
        read_json(&self.path)
    }

    /// Replace the whole document
    pub async fn replace(&self, value: &T) -> Result<(), SnapshotError> {
        let _guard = self.write_lock.lock().await;
        write_json_atomic(&self.path, value)?;
        log::debug!("💾 Replaced snapshot {}", self.path.display());
        Ok(())
    }
}
