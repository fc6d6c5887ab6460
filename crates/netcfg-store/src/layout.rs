use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a configuration store.
///
/// All directories are created lazily by [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("components.json")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Holds the label of the current write-lock owner.
    #[inline]
    pub fn lock_owner_file(&self) -> PathBuf {
        self.root.join("lock.owner")
    }

    #[inline]
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Whether the store has been created on disk.
    pub fn is_initialized(&self) -> bool {
        self.root.join(VERSION_FILE).is_file()
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.packages_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.root.join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/netcfg-test");
        assert_eq!(
            layout.registry_file(),
            PathBuf::from("/tmp/netcfg-test/components.json")
        );
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/netcfg-test/lock"));
        assert_eq!(
            layout.lock_owner_file(),
            PathBuf::from("/tmp/netcfg-test/lock.owner")
        );
        assert_eq!(
            layout.packages_dir(),
            PathBuf::from("/tmp/netcfg-test/packages")
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.packages_dir().is_dir());
        layout.verify_version().unwrap();
    }

    #[test]
    fn foreign_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        fs::write(dir.path().join("version"), r#"{"format_version": 99}"#).unwrap();
        let err = layout.initialize().unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionMismatch { found: 99, .. }
        ));
    }
}
