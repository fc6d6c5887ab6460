//! Filesystem-backed configuration store for netcfg.
//!
//! This crate provides a real implementation of the `netcfg-core` collaborator
//! traits: `StoreLayout` for the on-disk directory structure, a JSON
//! `ComponentRegistry` written atomically, a named `WriteLock` over an advisory
//! file lock with a timeout, `FileSubsystem` implementing `ConfigSubsystem`, and
//! `FsPackageStager` which copies install packages into the store's package
//! directory.

pub mod layout;
pub mod lock;
pub mod registry;
pub mod staging;
pub mod subsystem;

pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::WriteLock;
pub use registry::{ComponentRecord, ComponentRegistry, Registry};
pub use staging::FsPackageStager;
pub use subsystem::{FileProvider, FileSubsystem};

use netcfg_core::{codes, SubsystemError};
use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("lock error: {0}")]
    LockFailed(String),
}

impl StoreError {
    /// HRESULT-style code for reporting through `netcfg-core`.
    pub fn code(&self) -> u32 {
        match self {
            StoreError::Io(e) => e
                .raw_os_error()
                .and_then(|c| u32::try_from(c).ok())
                .map_or(codes::FAIL, codes::from_os_error),
            StoreError::Serialization(_)
            | StoreError::VersionMismatch { .. }
            | StoreError::LockFailed(_) => codes::FAIL,
        }
    }
}

impl From<StoreError> for SubsystemError {
    fn from(e: StoreError) -> Self {
        SubsystemError::new(e.code(), e.to_string())
    }
}
