use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::debug;
use tempfile::NamedTempFile;

use super::{Records, Store};
use crate::error::StoreError;
use crate::modules::utils::logging::log_data_operation;

/// How long a transaction waits for another process to release the store
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Store persisted as a single pretty-printed JSON document.
///
/// Every transaction holds an exclusive advisory lock on a sibling
/// `<file>.lock` while it loads the file, applies the body and, on commit,
/// renames a freshly written temp file over the original. Reads take the
/// same lock shared. Processes sharing the file therefore see each
/// read-modify-write as one atomic step.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    lock: Mutex<()>,
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Held advisory lock; released when dropped
struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            debug!("Failed to release store lock: {}", e);
        }
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("store"));
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Self {
            path,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock: Mutex::new(()),
        }
    }

    /// Give up with [`StoreError::LockTimeout`] after waiting this long for another holder
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn acquire(&self, mode: LockMode) -> Result<FileLock, StoreError> {
        fs::create_dir_all(self.dir())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;

        let started = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => return Ok(FileLock(file)),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= self.lock_timeout {
                        log_data_operation(
                            "lock",
                            &self.path.display().to_string(),
                            "json_store",
                            false,
                            Some("timed out waiting for another holder"),
                        );
                        return Err(StoreError::LockTimeout(self.lock_timeout));
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn load(&self) -> Result<Records, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Records::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            // First use: start from an empty store
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Records::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, records: &Records) -> Result<(), StoreError> {
        let mut file = NamedTempFile::new_in(self.dir())?;
        serde_json::to_writer_pretty(&mut file, records)?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!("Saved store to {}", self.path.display());
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn transaction(&self, f: &mut dyn FnMut(&mut Records) -> bool) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _file_lock = self.acquire(LockMode::Exclusive)?;

        let mut records = self.load()?;
        if f(&mut records) {
            if let Err(e) = self.save(&records) {
                log_data_operation(
                    "save",
                    &self.path.display().to_string(),
                    "json_store",
                    false,
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn view(&self, f: &mut dyn FnMut(&Records)) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _file_lock = self.acquire(LockMode::Shared)?;

        let records = self.load()?;
        f(&records);
        Ok(())
    }
}
