//! Network store collaborator and the two stores shipped with the crate.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

use crate::error::LauncherError;
use crate::types::AccountLocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with [`StoreError::AlreadyExists`] if a blob is present.
    Create,
    /// Overwrite whatever is stored.
    Replace,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("blob already exists")]
    AlreadyExists,
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl From<StoreError> for LauncherError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => LauncherError::Network(reason),
            StoreError::AlreadyExists => LauncherError::AccountExists,
            StoreError::Rejected(reason) => LauncherError::Storage(reason),
        }
    }
}

impl From<io::Error> for StoreError {
    /// Transient kinds stay retryable. Anything else is a rejection.
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Rejected(err.to_string()),
        }
    }
}

/// Remote home of account blobs.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    async fn fetch(&self, locator: &AccountLocator) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(
        &self,
        locator: &AccountLocator,
        blob: Vec<u8>,
        mode: PutMode,
    ) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn NetworkStore>;

#[derive(Debug, Default)]
struct MemoryState {
    blobs: HashMap<String, Vec<u8>>,
    fetches: usize,
    puts: usize,
    fetch_failures: VecDeque<StoreError>,
    put_failures: VecDeque<StoreError>,
}

/// In-process store. Counts every call and can be told to fail upcoming
/// calls.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch` calls received, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Number of `put` calls received, failed ones included.
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    pub fn blob(&self, locator: &AccountLocator) -> Option<Vec<u8>> {
        self.lock().blobs.get(locator.as_str()).cloned()
    }

    pub fn insert_blob(&self, locator: &AccountLocator, blob: Vec<u8>) {
        self.lock().blobs.insert(locator.as_str().to_string(), blob);
    }

    pub fn fail_next_fetch(&self, err: StoreError) {
        self.lock().fetch_failures.push_back(err);
    }

    pub fn fail_next_put(&self, err: StoreError) {
        self.lock().put_failures.push_back(err);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge every later call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NetworkStore for MemoryStore {
    async fn fetch(&self, locator: &AccountLocator) -> Result<Option<Vec<u8>>, StoreError> {
        let mut state = self.lock();
        state.fetches += 1;
        if let Some(err) = state.fetch_failures.pop_front() {
            return Err(err);
        }
        Ok(state.blobs.get(locator.as_str()).cloned())
    }

    async fn put(
        &self,
        locator: &AccountLocator,
        blob: Vec<u8>,
        mode: PutMode,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.puts += 1;
        if let Some(err) = state.put_failures.pop_front() {
            return Err(err);
        }
        if mode == PutMode::Create && state.blobs.contains_key(locator.as_str()) {
            return Err(StoreError::AlreadyExists);
        }
        state.blobs.insert(locator.as_str().to_string(), blob);
        Ok(())
    }
}

/// One file per account under a root directory.
///
/// Writes take an exclusive lock on `store.lock`, go to a temp file that is
/// fsynced and then renamed over the final `<locator>.account`. Reads take a
/// shared lock and never create anything.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, locator: &AccountLocator) -> PathBuf {
        self.root.join(format!("{}.account", locator.as_str()))
    }
}

#[async_trait]
impl NetworkStore for DiskStore {
    async fn fetch(&self, locator: &AccountLocator) -> Result<Option<Vec<u8>>, StoreError> {
        let root = self.root.clone();
        let path = self.blob_path(locator);
        tokio::task::spawn_blocking(move || read_blob(&root, &path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
            .map_err(StoreError::from)
    }

    async fn put(
        &self,
        locator: &AccountLocator,
        blob: Vec<u8>,
        mode: PutMode,
    ) -> Result<(), StoreError> {
        let root = self.root.clone();
        let path = self.blob_path(locator);
        let result = tokio::task::spawn_blocking(move || write_blob(&root, &path, &blob, mode))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?;
        match result {
            Ok(true) => {
                debug!(locator = %locator, "Account blob written");
                Ok(())
            }
            Ok(false) => Err(StoreError::AlreadyExists),
            Err(e) => Err(StoreError::from(e)),
        }
    }
}

const LOCK_FILE: &str = "store.lock";

fn create_root(root: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .mode(0o700)
            .recursive(true)
            .create(root)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(root)
    }
}

fn lock_root(root: &Path) -> io::Result<File> {
    create_root(root)?;
    let lock = File::create(root.join(LOCK_FILE))?;
    lock.lock_exclusive()?;
    Ok(lock)
}

fn read_blob(root: &Path, path: &Path) -> io::Result<Option<Vec<u8>>> {
    // No lock file means nothing was ever written here.
    let lock = match File::open(root.join(LOCK_FILE)) {
        Ok(lock) => lock,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    lock.lock_shared()?;
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns `Ok(false)` when `mode` is `Create` and the blob already exists.
fn write_blob(root: &Path, path: &Path, blob: &[u8], mode: PutMode) -> io::Result<bool> {
    let lock = lock_root(root)?;
    if mode == PutMode::Create && path.exists() {
        return Ok(false);
    }

    let temp_path = path.with_extension("account.tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&temp_path)?;
    file.write_all(blob)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        let dir = File::open(root)?;
        dir.sync_all()?;
    }

    drop(lock);
    Ok(true)
}
