use crate::codes;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message} (os error {os_code})")]
pub struct StagingError {
    pub os_code: u32,
    pub message: String,
}

impl StagingError {
    pub fn new(os_code: u32, message: impl Into<String>) -> Self {
        Self {
            os_code,
            message: message.into(),
        }
    }

    pub fn hresult(&self) -> u32 {
        codes::from_os_error(self.os_code)
    }
}

impl From<std::io::Error> for StagingError {
    fn from(e: std::io::Error) -> Self {
        let os_code = e
            .raw_os_error()
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(match e.kind() {
                std::io::ErrorKind::NotFound => 2,
                std::io::ErrorKind::PermissionDenied => 5,
                std::io::ErrorKind::AlreadyExists => 183,
                _ => 31,
            });
        Self::new(os_code, e.to_string())
    }
}

/// Copies an install package and the files next to it into the system's
/// package store.
pub trait PackageStager {
    /// Stage `package_path`; sibling files are taken from `sibling_dir`.
    /// Returns the staged location of the package.
    fn stage_install_package(
        &self,
        package_path: &Path,
        sibling_dir: &Path,
    ) -> Result<PathBuf, StagingError>;
}

impl<T: PackageStager + ?Sized> PackageStager for std::sync::Arc<T> {
    fn stage_install_package(
        &self,
        package_path: &Path,
        sibling_dir: &Path,
    ) -> Result<PathBuf, StagingError> {
        (**self).stage_install_package(package_path, sibling_dir)
    }
}
