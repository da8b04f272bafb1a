//! Durable storage for the known-device roster.
//!
//! The registry only ever hands a store the whole serialized roster, so a
//! backend just needs to load and replace one blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};

/// Backend holding the serialized *known* roster.
pub trait KnownStore: Send {
    /// Returns `None` when nothing has been stored yet.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the stored roster.
    fn save(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// In-memory store. Clones share the same buffer, so a test can keep a handle
/// and inspect what the registry wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Option<Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        store.replace(bytes.into());
        store
    }

    /// Current contents, if any.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().map(|d| d.clone()).unwrap_or(None)
    }

    /// Number of `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    fn replace(&self, bytes: Vec<u8>) {
        if let Ok(mut data) = self.data.lock() {
            *data = Some(bytes);
        }
    }
}

impl KnownStore for MemoryStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        self.data
            .lock()
            .map(|d| d.clone())
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }

    fn save(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.replace(bytes.to_vec());
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }
}

/// JSON file on disk. A missing file reads as empty storage.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KnownStore for FileStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!("Loaded {} bytes of known devices from {:?}", bytes.len(), self.path);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Known devices file not found at {:?}, starting empty.", self.path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn save(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        // Replace atomically.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Known devices saved to {:?}", self.path);
        Ok(())
    }
}
