use crate::layout::StoreLayout;
use netcfg_core::{PackageStager, StagingError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PACKAGE_PREFIX: &str = "oem";

/// Copies install packages into `<store>/packages/oem<N>/`.
///
/// The package is stored as `oem<N>.inf` next to copies of every regular file
/// from its sibling directory. A package whose content matches one already
/// staged is not copied again; the existing location is returned.
pub struct FsPackageStager {
    layout: StoreLayout,
}

impl FsPackageStager {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn staged_packages(&self) -> Result<Vec<(u32, PathBuf)>, StagingError> {
        let dir = self.layout.packages_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PACKAGE_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let inf = entry.path().join(format!("{PACKAGE_PREFIX}{index}.inf"));
            if inf.is_file() {
                found.push((index, inf));
            }
        }
        found.sort_by_key(|(index, _)| *index);
        Ok(found)
    }
}

impl PackageStager for FsPackageStager {
    fn stage_install_package(
        &self,
        package_path: &Path,
        sibling_dir: &Path,
    ) -> Result<PathBuf, StagingError> {
        let content = fs::read(package_path)?;
        let digest = blake3::hash(&content);

        let staged = self.staged_packages()?;
        for (_, existing) in &staged {
            if blake3::hash(&fs::read(existing)?) == digest {
                debug!(
                    "{} already staged as {}",
                    package_path.display(),
                    existing.display()
                );
                return Ok(existing.clone());
            }
        }

        let index = staged.last().map_or(0, |(i, _)| i + 1);
        let name = format!("{PACKAGE_PREFIX}{index}");
        let packages_dir = self.layout.packages_dir();
        fs::create_dir_all(&packages_dir)?;

        let tmp = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&packages_dir)?;
        let package_name = package_path.file_name();
        for entry in fs::read_dir(sibling_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file()
                || Some(entry.file_name().as_os_str()) == package_name
            {
                continue;
            }
            fs::copy(entry.path(), tmp.path().join(entry.file_name()))?;
        }
        fs::write(tmp.path().join(format!("{name}.inf")), &content)?;

        let dest = packages_dir.join(&name);
        fs::rename(tmp.path(), &dest)?;
        let staged_inf = dest.join(format!("{name}.inf"));
        info!(
            "staged {} as {}",
            package_path.display(),
            staged_inf.display()
        );
        Ok(staged_inf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcfg_core::codes;

    fn write_package(dir: &Path, inf: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("OemVista.inf");
        fs::write(&path, inf).unwrap();
        fs::write(dir.join("tap0901.sys"), b"driver").unwrap();
        fs::write(dir.join("tap0901.cat"), b"catalog").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();
        path
    }

    #[test]
    fn stages_package_with_siblings() {
        let store = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let inf = write_package(src.path(), "[Version]\nClass=Net\n");
        let stager = FsPackageStager::new(StoreLayout::new(store.path()));

        let staged = stager.stage_install_package(&inf, src.path()).unwrap();
        let dir = staged.parent().unwrap();
        assert_eq!(staged.file_name().unwrap(), "oem0.inf");
        assert_eq!(fs::read_to_string(&staged).unwrap(), "[Version]\nClass=Net\n");
        assert!(dir.join("tap0901.sys").is_file());
        assert!(dir.join("tap0901.cat").is_file());
        assert!(!dir.join("OemVista.inf").exists());
        assert!(!dir.join("nested").exists());
    }

    #[test]
    fn identical_package_is_reused() {
        let store = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let inf = write_package(src.path(), "[Version]\nClass=Net\n");
        let stager = FsPackageStager::new(StoreLayout::new(store.path()));

        let first = stager.stage_install_package(&inf, src.path()).unwrap();
        let second = stager.stage_install_package(&inf, src.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_package_gets_next_slot() {
        let store = tempfile::tempdir().unwrap();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let inf_a = write_package(a.path(), "[Version]\nClass=Net\n");
        let inf_b = write_package(b.path(), "[Version]\nClass=NetService\n");
        let stager = FsPackageStager::new(StoreLayout::new(store.path()));

        stager.stage_install_package(&inf_a, a.path()).unwrap();
        let staged = stager.stage_install_package(&inf_b, b.path()).unwrap();
        assert!(staged.ends_with("oem1/oem1.inf"));
    }

    #[test]
    fn missing_package_reports_os_error() {
        let store = tempfile::tempdir().unwrap();
        let stager = FsPackageStager::new(StoreLayout::new(store.path()));
        let err = stager
            .stage_install_package(Path::new("/nonexistent/pkg.inf"), Path::new("/nonexistent"))
            .unwrap_err();
        assert_eq!(err.os_code, 2);
        assert_eq!(err.hresult(), codes::FILE_NOT_FOUND);
    }
}
