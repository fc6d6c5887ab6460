use crate::handle::ConfigStoreHandle;
use crate::staging::PackageStager;
use crate::subsystem::{ConfigSubsystem, SubsystemError};
use crate::types::{ComponentDescriptor, OboToken};
use crate::NetCfgError;
use std::path::Path;
use tracing::{debug, info};

/// Steps of the install and uninstall state machines, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStep {
    StagePackage,
    ResolveClassSetup,
    InvokeInstall,
    FindComponent,
    ResolveClass,
    InvokeDeinstall,
    Apply,
}

impl std::fmt::Display for TransactionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStep::StagePackage => write!(f, "stage-package"),
            TransactionStep::ResolveClassSetup => write!(f, "resolve-class-setup"),
            TransactionStep::InvokeInstall => write!(f, "install"),
            TransactionStep::FindComponent => write!(f, "find-component"),
            TransactionStep::ResolveClass => write!(f, "resolve-class"),
            TransactionStep::InvokeDeinstall => write!(f, "deinstall"),
            TransactionStep::Apply => write!(f, "apply"),
        }
    }
}

/// One install or uninstall against an open store.
///
/// Steps run in order and the first failure aborts the rest. Nothing is
/// rolled back: a failure before `Apply` leaves only staged changes, which the
/// store drops when it is closed. Every handle a step acquires is released
/// before the transaction returns.
#[derive(Debug, Clone, Copy)]
pub enum ComponentTransaction<'a> {
    Install(&'a ComponentDescriptor),
    Uninstall { component_id: &'a str },
}

impl ComponentTransaction<'_> {
    pub fn component_id(&self) -> &str {
        match self {
            ComponentTransaction::Install(d) => &d.component_id,
            ComponentTransaction::Uninstall { component_id } => component_id,
        }
    }

    pub fn steps(&self) -> &'static [TransactionStep] {
        match self {
            ComponentTransaction::Install(_) => &[
                TransactionStep::StagePackage,
                TransactionStep::ResolveClassSetup,
                TransactionStep::InvokeInstall,
                TransactionStep::Apply,
            ],
            ComponentTransaction::Uninstall { .. } => &[
                TransactionStep::FindComponent,
                TransactionStep::ResolveClass,
                TransactionStep::InvokeDeinstall,
                TransactionStep::Apply,
            ],
        }
    }

    pub fn run<S: ConfigSubsystem>(
        &self,
        store: &ConfigStoreHandle<S>,
        stager: &dyn PackageStager,
    ) -> Result<(), NetCfgError> {
        match self {
            ComponentTransaction::Install(descriptor) => install(store, stager, descriptor),
            ComponentTransaction::Uninstall { component_id } => uninstall(store, component_id),
        }
    }
}

fn install<S: ConfigSubsystem>(
    store: &ConfigStoreHandle<S>,
    stager: &dyn PackageStager,
    descriptor: &ComponentDescriptor,
) -> Result<(), NetCfgError> {
    let component_id = descriptor.component_id.as_str();

    if let Some(inf_path) = &descriptor.inf_path {
        debug!("{}: {}", TransactionStep::StagePackage, inf_path.display());
        // A bare file name has an empty parent; its siblings live in the working directory.
        let sibling_dir = inf_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let staged = stager
            .stage_install_package(inf_path, sibling_dir)
            .map_err(|source| NetCfgError::PackageStagingFailed {
                path: inf_path.clone(),
                source,
            })?;
        debug!("package staged as {}", staged.display());
    }

    let subsystem = store.subsystem();
    {
        debug!(
            "{}: {}",
            TransactionStep::ResolveClassSetup,
            descriptor.class_id
        );
        let setup = subsystem
            .resolve_class_setup(descriptor.class_id)
            .map_err(|source| NetCfgError::ClassNotSupported {
                class_id: descriptor.class_id,
                source,
            })?;

        debug!("{}: {component_id}", TransactionStep::InvokeInstall);
        let component = setup
            .install(component_id, &OboToken::user(), 0, 0, None)
            .map_err(|source| NetCfgError::InstallRejected {
                component_id: component_id.to_owned(),
                source,
            })?;
        drop(component);
    }

    debug!("{}", TransactionStep::Apply);
    subsystem
        .apply_changes()
        .map_err(NetCfgError::ApplyFailed)?;
    info!("installed {component_id}");
    Ok(())
}

fn uninstall<S: ConfigSubsystem>(
    store: &ConfigStoreHandle<S>,
    component_id: &str,
) -> Result<(), NetCfgError> {
    let subsystem = store.subsystem();
    let not_found = |source: Option<SubsystemError>| NetCfgError::ComponentNotFound {
        component_id: component_id.to_owned(),
        source,
    };

    debug!("{}: {component_id}", TransactionStep::FindComponent);
    let component = subsystem
        .find_component(component_id)
        .map_err(|e| not_found(Some(e)))?
        .ok_or_else(|| not_found(None))?;

    let class_id = component.class_id().map_err(|e| not_found(Some(e)))?;
    debug!("{}: {class_id}", TransactionStep::ResolveClass);
    let class = subsystem
        .resolve_class(class_id)
        .map_err(|source| NetCfgError::ClassNotSupported { class_id, source })?;
    let setup = class
        .setup()
        .map_err(|source| NetCfgError::ClassNotSupported { class_id, source })?;

    debug!("{}: {component_id}", TransactionStep::InvokeDeinstall);
    setup
        .deinstall(&*component, &OboToken::user(), 0)
        .map_err(|source| NetCfgError::DeinstallRejected {
            component_id: component_id.to_owned(),
            source,
        })?;

    debug!("{}", TransactionStep::Apply);
    subsystem
        .apply_changes()
        .map_err(NetCfgError::ApplyFailed)?;
    info!("uninstalled {component_id}");

    // Release in reverse order of acquisition.
    drop(setup);
    drop(class);
    drop(component);
    Ok(())
}
