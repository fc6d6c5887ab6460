use crate::layout::StoreLayout;
use crate::lock::WriteLock;
use crate::registry::{ComponentRecord, ComponentRegistry, Registry};
use netcfg_core::subsystem::{
    ClassHandle, ClassResolver, ClassSetup, ComponentHandle, ComponentInfo, ConfigSubsystem,
    DeinstallHandler, InstallHandler, LockAcquireError, SubsystemError, SubsystemProvider,
};
use netcfg_core::{codes, AnswerFile, ClassId, OboToken};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
enum StagedChange {
    Install {
        component_id: String,
        class_id: ClassId,
        obo: OboToken,
    },
    Deinstall {
        component_id: String,
    },
}

#[derive(Default)]
struct Session {
    connected: bool,
    lock: Option<WriteLock>,
    registry: Option<Registry>,
    staged: Vec<StagedChange>,
}

/// One session's view of an on-disk store.
///
/// Changes made through class setup handles are staged in memory and only
/// written to `components.json` by `apply_changes`.
pub struct FileSubsystem {
    layout: StoreLayout,
    session: Mutex<Session>,
}

impl FileSubsystem {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed registry with this session's staged changes applied.
    fn view(&self) -> Result<Registry, SubsystemError> {
        let session = self.session();
        let Some(registry) = &session.registry else {
            return Err(not_initialized());
        };
        let mut view = registry.clone();
        apply_staged(&mut view, &session.staged);
        Ok(view)
    }

    fn require_write_lock(&self) -> Result<(), SubsystemError> {
        if self.session().lock.is_some() {
            Ok(())
        } else {
            Err(SubsystemError::new(
                codes::NO_WRITE_LOCK,
                "session does not hold the write lock",
            ))
        }
    }

    fn check_class(&self, class_id: ClassId) -> Result<(), SubsystemError> {
        if self.session().registry.is_none() {
            return Err(not_initialized());
        }
        if ClassId::BUILTIN.contains(&class_id) {
            Ok(())
        } else {
            Err(SubsystemError::new(
                codes::INVALID_ARG,
                format!("no setup class {class_id}"),
            ))
        }
    }

    fn stage(&self, change: StagedChange) {
        self.session().staged.push(change);
    }
}

fn not_initialized() -> SubsystemError {
    SubsystemError::new(codes::NOT_INITIALIZED, "store is not initialized")
}

fn apply_staged(registry: &mut Registry, staged: &[StagedChange]) {
    let now = chrono::Utc::now().to_rfc3339();
    for change in staged {
        match change {
            StagedChange::Install {
                component_id,
                class_id,
                obo,
            } => registry.insert(ComponentRecord {
                component_id: component_id.clone(),
                class_id: *class_id,
                installed_by: obo.actor,
                installed_at: now.clone(),
            }),
            StagedChange::Deinstall { component_id } => {
                registry.remove(component_id);
            }
        }
    }
}

impl ClassResolver for FileSubsystem {
    fn resolve_class(
        &self,
        class_id: ClassId,
    ) -> Result<Box<dyn ClassHandle + '_>, SubsystemError> {
        self.check_class(class_id)?;
        Ok(Box::new(FileClass {
            subsystem: self,
            class_id,
        }))
    }

    fn resolve_class_setup(
        &self,
        class_id: ClassId,
    ) -> Result<Box<dyn ClassSetup + '_>, SubsystemError> {
        self.check_class(class_id)?;
        Ok(Box::new(FileClassSetup {
            subsystem: self,
            class_id,
        }))
    }
}

impl ConfigSubsystem for FileSubsystem {
    /// Only checks an existing store. The layout is created when a session
    /// takes the write lock, so read-only sessions never write to disk.
    fn connect(&self) -> Result<(), SubsystemError> {
        if self.layout.is_initialized() {
            self.layout.verify_version()?;
        }
        self.session().connected = true;
        Ok(())
    }

    fn disconnect(&self) {
        let mut session = self.session();
        session.connected = false;
        session.registry = None;
        session.staged.clear();
        // A lock still held here was never released by the owner; drop it.
        session.lock = None;
    }

    fn acquire_write_lock(&self, timeout: Duration, owner: &str) -> Result<(), LockAcquireError> {
        if self.session().lock.is_some() {
            return Ok(());
        }
        self.layout
            .initialize()
            .map_err(|e| LockAcquireError::Failed(e.into()))?;
        match WriteLock::acquire(&self.layout, owner, timeout) {
            Ok(Some(lock)) => {
                self.session().lock = Some(lock);
                Ok(())
            }
            Ok(None) => Err(LockAcquireError::Contended {
                holder: WriteLock::holder(&self.layout),
            }),
            Err(e) => Err(LockAcquireError::Failed(e.into())),
        }
    }

    fn release_write_lock(&self) -> Result<(), SubsystemError> {
        let Some(lock) = self.session().lock.take() else {
            return Err(SubsystemError::new(
                codes::NO_WRITE_LOCK,
                "session does not hold the write lock",
            ));
        };
        lock.release()?;
        Ok(())
    }

    fn initialize(&self) -> Result<(), SubsystemError> {
        let mut session = self.session();
        if !session.connected {
            return Err(SubsystemError::new(
                codes::NOT_INITIALIZED,
                "subsystem is not connected",
            ));
        }
        if session.registry.is_some() {
            return Err(SubsystemError::new(
                codes::ALREADY_INITIALIZED,
                "store already initialized",
            ));
        }
        if !self.layout.root().is_dir() {
            return Err(SubsystemError::new(
                codes::FILE_NOT_FOUND,
                format!("store {} does not exist", self.layout.root().display()),
            ));
        }
        let registry = ComponentRegistry::new(self.layout.clone()).load()?;
        debug!(
            "store initialized with {} components",
            registry.components.len()
        );
        session.registry = Some(registry);
        Ok(())
    }

    fn uninitialize(&self) -> Result<(), SubsystemError> {
        let mut session = self.session();
        if session.registry.take().is_none() {
            return Err(not_initialized());
        }
        if !session.staged.is_empty() {
            debug!("discarding {} staged changes", session.staged.len());
            session.staged.clear();
        }
        Ok(())
    }

    fn find_component(
        &self,
        component_id: &str,
    ) -> Result<Option<Box<dyn ComponentHandle + '_>>, SubsystemError> {
        Ok(self.view()?.get(component_id).map(|record| {
            Box::new(FileComponent {
                component_id: record.component_id.clone(),
                class_id: record.class_id,
            }) as Box<dyn ComponentHandle + '_>
        }))
    }

    fn list_components(&self) -> Result<Vec<ComponentInfo>, SubsystemError> {
        Ok(self
            .view()?
            .components
            .into_iter()
            .map(|c| ComponentInfo {
                component_id: c.component_id,
                class_id: c.class_id,
            })
            .collect())
    }

    fn apply_changes(&self) -> Result<(), SubsystemError> {
        self.require_write_lock()?;
        let mut session = self.session();
        let Some(registry) = &session.registry else {
            return Err(not_initialized());
        };
        if session.staged.is_empty() {
            return Ok(());
        }
        let mut updated = registry.clone();
        apply_staged(&mut updated, &session.staged);
        ComponentRegistry::new(self.layout.clone()).save(&updated)?;
        info!("applied {} staged changes", session.staged.len());
        session.registry = Some(updated);
        session.staged.clear();
        Ok(())
    }
}

struct FileComponent {
    component_id: String,
    class_id: ClassId,
}

impl ComponentHandle for FileComponent {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn class_id(&self) -> Result<ClassId, SubsystemError> {
        Ok(self.class_id)
    }
}

struct FileClass<'a> {
    subsystem: &'a FileSubsystem,
    class_id: ClassId,
}

impl ClassHandle for FileClass<'_> {
    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn setup(&self) -> Result<Box<dyn ClassSetup + '_>, SubsystemError> {
        Ok(Box::new(FileClassSetup {
            subsystem: self.subsystem,
            class_id: self.class_id,
        }))
    }
}

struct FileClassSetup<'a> {
    subsystem: &'a FileSubsystem,
    class_id: ClassId,
}

impl InstallHandler for FileClassSetup<'_> {
    fn install(
        &self,
        component_id: &str,
        obo: &OboToken,
        _flags: u32,
        _upgrade_from_build: u32,
        _answer_file: Option<&AnswerFile>,
    ) -> Result<Box<dyn ComponentHandle + '_>, SubsystemError> {
        self.subsystem.require_write_lock()?;
        if self.subsystem.view()?.contains(component_id) {
            return Err(SubsystemError::new(
                codes::ALREADY_EXISTS,
                format!("component '{component_id}' is already installed"),
            ));
        }
        self.subsystem.stage(StagedChange::Install {
            component_id: component_id.to_owned(),
            class_id: self.class_id,
            obo: *obo,
        });
        Ok(Box::new(FileComponent {
            component_id: component_id.to_owned(),
            class_id: self.class_id,
        }))
    }
}

impl DeinstallHandler for FileClassSetup<'_> {
    fn deinstall(
        &self,
        component: &dyn ComponentHandle,
        _obo: &OboToken,
        _flags: u32,
    ) -> Result<(), SubsystemError> {
        self.subsystem.require_write_lock()?;
        let component_id = component.component_id();
        if !self.subsystem.view()?.contains(component_id) {
            return Err(SubsystemError::new(
                codes::FILE_NOT_FOUND,
                format!("component '{component_id}' is not installed"),
            ));
        }
        self.subsystem.stage(StagedChange::Deinstall {
            component_id: component_id.to_owned(),
        });
        Ok(())
    }
}

/// Creates a [`FileSubsystem`] per session over one store root.
#[derive(Debug, Clone)]
pub struct FileProvider {
    layout: StoreLayout,
}

impl FileProvider {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }
}

impl SubsystemProvider for FileProvider {
    type Subsystem = FileSubsystem;

    fn create(&self) -> FileSubsystem {
        FileSubsystem::new(self.layout.clone())
    }
}
