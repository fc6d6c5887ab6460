use crate::types::{AnswerFile, ClassId, OboToken};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a configuration subsystem or one of its handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code:#010x})")]
pub struct SubsystemError {
    pub code: u32,
    pub message: String,
}

impl SubsystemError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockAcquireError {
    /// Another application holds the write lock.
    #[error("write lock held by {}", .holder.as_deref().unwrap_or("unknown"))]
    Contended { holder: Option<String> },
    #[error(transparent)]
    Failed(SubsystemError),
}

/// Installed component as listed by a read-only session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub component_id: String,
    pub class_id: ClassId,
}

/// Live reference to a component in the store. Dropping it releases the reference.
pub trait ComponentHandle {
    fn component_id(&self) -> &str;

    fn class_id(&self) -> Result<ClassId, SubsystemError>;
}

pub trait InstallHandler {
    /// Stage installation of `component_id`. The returned reference only
    /// confirms success; callers may drop it immediately.
    fn install(
        &self,
        component_id: &str,
        obo: &OboToken,
        flags: u32,
        upgrade_from_build: u32,
        answer_file: Option<&AnswerFile>,
    ) -> Result<Box<dyn ComponentHandle + '_>, SubsystemError>;
}

pub trait DeinstallHandler {
    fn deinstall(
        &self,
        component: &dyn ComponentHandle,
        obo: &OboToken,
        flags: u32,
    ) -> Result<(), SubsystemError>;
}

/// Class-specific setup capability.
pub trait ClassSetup: InstallHandler + DeinstallHandler {}

impl<T: InstallHandler + DeinstallHandler + ?Sized> ClassSetup for T {}

/// Reference to a setup class; yields the class's setup capability.
pub trait ClassHandle {
    fn class_id(&self) -> ClassId;

    fn setup(&self) -> Result<Box<dyn ClassSetup + '_>, SubsystemError>;
}

pub trait ClassResolver {
    fn resolve_class(&self, class_id: ClassId) -> Result<Box<dyn ClassHandle + '_>, SubsystemError>;

    fn resolve_class_setup(
        &self,
        class_id: ClassId,
    ) -> Result<Box<dyn ClassSetup + '_>, SubsystemError>;
}

/// A session's view of the shared configuration store.
///
/// Every handle returned by a subsystem borrows it and releases its reference
/// when dropped. Implementations use interior mutability: a session is
/// single-threaded and all calls block until the store answers.
pub trait ConfigSubsystem: ClassResolver {
    /// Bring up the runtime the store lives in. Precedes every other call.
    fn connect(&self) -> Result<(), SubsystemError>;

    /// Tear the runtime down. Called exactly once per successful `connect`.
    fn disconnect(&self);

    fn acquire_write_lock(&self, timeout: Duration, owner: &str) -> Result<(), LockAcquireError>;

    fn release_write_lock(&self) -> Result<(), SubsystemError>;

    fn initialize(&self) -> Result<(), SubsystemError>;

    fn uninitialize(&self) -> Result<(), SubsystemError>;

    /// `Ok(None)` when no component with this id is installed.
    fn find_component(
        &self,
        component_id: &str,
    ) -> Result<Option<Box<dyn ComponentHandle + '_>>, SubsystemError>;

    fn list_components(&self) -> Result<Vec<ComponentInfo>, SubsystemError>;

    /// Commit every staged install/deinstall.
    fn apply_changes(&self) -> Result<(), SubsystemError>;
}

/// Creates one subsystem instance per session.
pub trait SubsystemProvider {
    type Subsystem: ConfigSubsystem;

    fn create(&self) -> Self::Subsystem;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn subsystem_error_display_includes_hex_code() {
        let e = SubsystemError::new(codes::NO_WRITE_LOCK, "no lock");
        let msg = e.to_string();
        assert!(msg.contains("no lock"));
        assert!(msg.contains("0x8004a024"));
    }

    #[test]
    fn contended_display_names_holder() {
        let e = LockAcquireError::Contended {
            holder: Some("installer".to_owned()),
        };
        assert!(e.to_string().contains("installer"));
    }
}
