//! Locked install/uninstall sessions against a shared network configuration store.
//!
//! This crate holds the session protocol: the `ConfigStoreHandle` that connects,
//! write-locks and initializes a configuration subsystem and always tears it down
//! in reverse order, the `ComponentTransaction` state machine that installs or
//! removes one component through class-specific setup handlers, and the
//! `SessionOrchestrator` that runs exactly one transaction per locked session.
//! Subsystems and package stagers are pluggable through the traits in
//! [`subsystem`] and [`staging`]; the [`mock`] module provides a refcount-tracking
//! implementation of both.

pub mod codes;
pub mod config;
pub mod handle;
pub mod mock;
pub mod session;
pub mod staging;
pub mod subsystem;
pub mod transaction;
pub mod types;

pub use config::{
    ConfigError, NetcfgConfig, SessionConfig, DEFAULT_APP_NAME, DEFAULT_LOCK_TIMEOUT,
};
pub use handle::ConfigStoreHandle;
pub use session::{SessionOrchestrator, TransactionResult};
pub use staging::{PackageStager, StagingError};
pub use subsystem::{
    ClassHandle, ClassResolver, ClassSetup, ComponentHandle, ComponentInfo, ConfigSubsystem,
    DeinstallHandler, InstallHandler, LockAcquireError, SubsystemError, SubsystemProvider,
};
pub use transaction::{ComponentTransaction, TransactionStep};
pub use types::{AnswerFile, ClassId, ComponentDescriptor, OboActor, OboToken};

use serde::Serialize;
use thiserror::Error;

/// Stage-level classification of a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LockContention,
    StoreInitFailed,
    PackageStagingFailed,
    ClassNotSupported,
    ComponentNotFound,
    InstallRejected,
    DeinstallRejected,
    ApplyFailed,
    PostApplyCleanupFailed,
}

impl ErrorKind {
    /// Whether retrying the same session later can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::LockContention | ErrorKind::PackageStagingFailed)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::LockContention => write!(f, "lock_contention"),
            ErrorKind::StoreInitFailed => write!(f, "store_init_failed"),
            ErrorKind::PackageStagingFailed => write!(f, "package_staging_failed"),
            ErrorKind::ClassNotSupported => write!(f, "class_not_supported"),
            ErrorKind::ComponentNotFound => write!(f, "component_not_found"),
            ErrorKind::InstallRejected => write!(f, "install_rejected"),
            ErrorKind::DeinstallRejected => write!(f, "deinstall_rejected"),
            ErrorKind::ApplyFailed => write!(f, "apply_failed"),
            ErrorKind::PostApplyCleanupFailed => write!(f, "post_apply_cleanup_failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetCfgError {
    #[error("configuration store is locked by {}", .holder.as_deref().unwrap_or("an unknown application"))]
    LockContention { holder: Option<String> },
    #[error("store initialization failed: {0}")]
    StoreInitFailed(SubsystemError),
    #[error("package staging failed for {path}: {source}")]
    PackageStagingFailed {
        path: std::path::PathBuf,
        #[source]
        source: StagingError,
    },
    #[error("setup class {class_id} is not supported: {source}")]
    ClassNotSupported {
        class_id: ClassId,
        #[source]
        source: SubsystemError,
    },
    #[error("component '{component_id}' not found")]
    ComponentNotFound {
        component_id: String,
        #[source]
        source: Option<SubsystemError>,
    },
    #[error("install of '{component_id}' rejected: {source}")]
    InstallRejected {
        component_id: String,
        #[source]
        source: SubsystemError,
    },
    #[error("deinstall of '{component_id}' rejected: {source}")]
    DeinstallRejected {
        component_id: String,
        #[source]
        source: SubsystemError,
    },
    #[error("apply failed: {0}")]
    ApplyFailed(SubsystemError),
    #[error("changes were applied but store teardown failed: {0}")]
    PostApplyCleanupFailed(SubsystemError),
    #[error("store teardown failed: {0}")]
    CloseFailed(SubsystemError),
}

impl NetCfgError {
    /// The failing stage. A teardown error outside of a committed session is
    /// reported as a store failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetCfgError::LockContention { .. } => ErrorKind::LockContention,
            NetCfgError::StoreInitFailed(_) | NetCfgError::CloseFailed(_) => {
                ErrorKind::StoreInitFailed
            }
            NetCfgError::PackageStagingFailed { .. } => ErrorKind::PackageStagingFailed,
            NetCfgError::ClassNotSupported { .. } => ErrorKind::ClassNotSupported,
            NetCfgError::ComponentNotFound { .. } => ErrorKind::ComponentNotFound,
            NetCfgError::InstallRejected { .. } => ErrorKind::InstallRejected,
            NetCfgError::DeinstallRejected { .. } => ErrorKind::DeinstallRejected,
            NetCfgError::ApplyFailed(_) => ErrorKind::ApplyFailed,
            NetCfgError::PostApplyCleanupFailed(_) => ErrorKind::PostApplyCleanupFailed,
        }
    }

    /// Underlying platform code, when the failing collaborator reported one.
    pub fn code(&self) -> Option<u32> {
        match self {
            NetCfgError::LockContention { .. } => Some(codes::NO_WRITE_LOCK),
            NetCfgError::StoreInitFailed(e)
            | NetCfgError::ClassNotSupported { source: e, .. }
            | NetCfgError::InstallRejected { source: e, .. }
            | NetCfgError::DeinstallRejected { source: e, .. }
            | NetCfgError::ApplyFailed(e)
            | NetCfgError::PostApplyCleanupFailed(e)
            | NetCfgError::CloseFailed(e) => Some(e.code),
            NetCfgError::PackageStagingFailed { source, .. } => Some(source.hresult()),
            NetCfgError::ComponentNotFound { source, .. } => source.as_ref().map(|e| e.code),
        }
    }

    /// Label of the application holding the write lock, for contention errors.
    pub fn lock_holder(&self) -> Option<&str> {
        match self {
            NetCfgError::LockContention { holder } => holder.as_deref(),
            _ => None,
        }
    }
}
