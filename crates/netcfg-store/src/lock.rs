use crate::layout::StoreLayout;
use crate::StoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Named exclusive write lock over the store.
///
/// Backed by an advisory lock on the layout's lock file. The owner label is
/// written next to it so contending applications can report who holds it.
/// Dropping the lock releases it.
pub struct WriteLock {
    lock_file: Option<File>,
    owner_path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

/// Readers see either the previous label or the complete new one.
fn write_owner(owner_path: &Path, owner: &str) -> Result<(), StoreError> {
    let dir = owner_path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(owner.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(owner_path)
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl WriteLock {
    /// Try to take the lock as `owner` until `timeout` elapses. Returns
    /// `Ok(None)` when another holder kept it for the whole period.
    pub fn acquire(
        layout: &StoreLayout,
        owner: &str,
        timeout: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let file = open_lock_file(&layout.lock_file())?;
        let deadline = Instant::now() + timeout;

        loop {
            if file.try_lock_exclusive().is_ok() {
                let owner_path = layout.lock_owner_file();
                if let Err(e) = write_owner(&owner_path, owner) {
                    let _ = file.unlock();
                    return Err(e);
                }
                debug!("write lock acquired by '{owner}'");
                return Ok(Some(Self {
                    lock_file: Some(file),
                    owner_path,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Label of the current holder, if one is recorded.
    pub fn holder(layout: &StoreLayout) -> Option<String> {
        fs::read_to_string(layout.lock_owner_file())
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    pub fn release(mut self) -> Result<(), StoreError> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<(), StoreError> {
        let Some(file) = self.lock_file.take() else {
            return Ok(());
        };
        match fs::remove_file(&self.owner_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to clear lock owner: {e}"),
        }
        file.unlock()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        debug!("write lock released");
        Ok(())
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}
