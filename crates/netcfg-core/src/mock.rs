//! In-memory configuration subsystem and package stager for tests.
//!
//! A [`MockNetwork`] is the shared machine state (installed components, the
//! write lock, supported classes). Each session gets its own [`MockSubsystem`]
//! with its own staged change set. Every call and every handle acquisition and
//! release is recorded as a [`MockEvent`].

use crate::codes;
use crate::staging::{PackageStager, StagingError};
use crate::subsystem::{
    ClassHandle, ClassResolver, ClassSetup, ComponentHandle, ComponentInfo, ConfigSubsystem,
    DeinstallHandler, InstallHandler, LockAcquireError, SubsystemError, SubsystemProvider,
};
use crate::types::{AnswerFile, ClassId, OboToken};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Component,
    Class,
    ClassSetup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Connect,
    Disconnect,
    AcquireWriteLock,
    ReleaseWriteLock,
    Initialize,
    Uninitialize,
    FindComponent(String),
    Acquire(HandleKind),
    Release(HandleKind),
    Install(String),
    Deinstall(String),
    Apply,
}

#[derive(Debug, Default)]
struct Failures {
    connect: Option<u32>,
    initialize: Option<u32>,
    uninitialize: Option<u32>,
    acquire_lock: Option<u32>,
    release_lock: Option<u32>,
    find_component: Option<u32>,
    apply: Option<u32>,
    install: HashMap<String, u32>,
    deinstall: HashMap<String, u32>,
}

#[derive(Debug)]
struct MockMachine {
    components: BTreeMap<String, ClassId>,
    classes: BTreeSet<ClassId>,
    lock_holder: Option<String>,
    connected: usize,
    live_handles: HashMap<HandleKind, i64>,
    acquisitions: usize,
    commits: usize,
    events: Vec<MockEvent>,
    failures: Failures,
}

/// Shared machine state. Cloning yields another view of the same machine.
#[derive(Debug, Clone)]
pub struct MockNetwork {
    machine: Arc<Mutex<MockMachine>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self {
            machine: Arc::new(Mutex::new(MockMachine {
                components: BTreeMap::new(),
                classes: ClassId::BUILTIN.into_iter().collect(),
                lock_holder: None,
                connected: 0,
                live_handles: HashMap::new(),
                acquisitions: 0,
                commits: 0,
                events: Vec::new(),
                failures: Failures::default(),
            })),
        }
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn machine(&self) -> MutexGuard<'_, MockMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: MockEvent) {
        self.machine().events.push(event);
    }

    /// Seed an already-committed component.
    pub fn add_component(&self, component_id: &str, class_id: ClassId) {
        self.machine()
            .components
            .insert(component_id.to_owned(), class_id);
    }

    pub fn remove_class(&self, class_id: ClassId) {
        self.machine().classes.remove(&class_id);
    }

    pub fn components(&self) -> BTreeMap<String, ClassId> {
        self.machine().components.clone()
    }

    pub fn has_component(&self, component_id: &str) -> bool {
        self.machine().components.contains_key(component_id)
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.machine().lock_holder.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.machine().connected > 0
    }

    /// Handles acquired and not yet released, across all kinds.
    pub fn live_handles(&self) -> i64 {
        self.machine().live_handles.values().sum()
    }

    pub fn total_acquisitions(&self) -> usize {
        self.machine().acquisitions
    }

    /// Number of successful, non-empty applies.
    pub fn commits(&self) -> usize {
        self.machine().commits
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.machine().events.clone()
    }

    pub fn count(&self, event: &MockEvent) -> usize {
        self.machine().events.iter().filter(|e| *e == event).count()
    }

    pub fn clear_events(&self) {
        self.machine().events.clear();
    }

    pub fn fail_connect(&self, code: u32) {
        self.machine().failures.connect = Some(code);
    }

    pub fn fail_initialize(&self, code: u32) {
        self.machine().failures.initialize = Some(code);
    }

    pub fn fail_uninitialize(&self, code: u32) {
        self.machine().failures.uninitialize = Some(code);
    }

    pub fn fail_acquire_lock(&self, code: u32) {
        self.machine().failures.acquire_lock = Some(code);
    }

    pub fn fail_release_lock(&self, code: u32) {
        self.machine().failures.release_lock = Some(code);
    }

    pub fn fail_find_component(&self, code: u32) {
        self.machine().failures.find_component = Some(code);
    }

    pub fn fail_apply(&self, code: u32) {
        self.machine().failures.apply = Some(code);
    }

    pub fn reject_install(&self, component_id: &str, code: u32) {
        self.machine()
            .failures
            .install
            .insert(component_id.to_owned(), code);
    }

    pub fn reject_deinstall(&self, component_id: &str, code: u32) {
        self.machine()
            .failures
            .deinstall
            .insert(component_id.to_owned(), code);
    }

    pub fn clear_failures(&self) {
        self.machine().failures = Failures::default();
    }

    fn acquire(&self, kind: HandleKind) -> HandleRef<'_> {
        let mut m = self.machine();
        *m.live_handles.entry(kind).or_insert(0) += 1;
        m.acquisitions += 1;
        m.events.push(MockEvent::Acquire(kind));
        HandleRef { net: self, kind }
    }
}

impl SubsystemProvider for MockNetwork {
    type Subsystem = MockSubsystem;

    fn create(&self) -> MockSubsystem {
        MockSubsystem::new(self.clone())
    }
}

/// One refcounted reference; released when dropped.
struct HandleRef<'a> {
    net: &'a MockNetwork,
    kind: HandleKind,
}

impl Drop for HandleRef<'_> {
    fn drop(&mut self) {
        let mut m = self.net.machine();
        *m.live_handles.entry(self.kind).or_insert(0) -= 1;
        m.events.push(MockEvent::Release(self.kind));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StagedChange {
    Install { component_id: String, class_id: ClassId },
    Deinstall { component_id: String },
}

#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    initialized: bool,
    holds_lock: bool,
    staged: Vec<StagedChange>,
}

/// Per-session view of a [`MockNetwork`].
#[derive(Debug)]
pub struct MockSubsystem {
    net: MockNetwork,
    session: Mutex<SessionState>,
}

impl MockSubsystem {
    pub fn new(net: MockNetwork) -> Self {
        Self {
            net,
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn network(&self) -> &MockNetwork {
        &self.net
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_initialized(&self) -> Result<(), SubsystemError> {
        if self.session().initialized {
            Ok(())
        } else {
            Err(SubsystemError::new(
                codes::NOT_INITIALIZED,
                "store is not initialized",
            ))
        }
    }

    fn require_write_lock(&self) -> Result<(), SubsystemError> {
        if self.session().holds_lock {
            Ok(())
        } else {
            Err(SubsystemError::new(
                codes::NO_WRITE_LOCK,
                "session does not hold the write lock",
            ))
        }
    }

    /// Committed components with this session's staged changes applied.
    fn view(&self) -> BTreeMap<String, ClassId> {
        let staged = self.session().staged.clone();
        let mut view = self.net.components();
        apply_staged(&mut view, &staged);
        view
    }

    fn check_class(&self, class_id: ClassId) -> Result<(), SubsystemError> {
        self.require_initialized()?;
        if self.net.machine().classes.contains(&class_id) {
            Ok(())
        } else {
            Err(SubsystemError::new(
                codes::INVALID_ARG,
                format!("no setup class {class_id}"),
            ))
        }
    }
}

fn apply_staged(components: &mut BTreeMap<String, ClassId>, staged: &[StagedChange]) {
    for change in staged {
        match change {
            StagedChange::Install {
                component_id,
                class_id,
            } => {
                components.insert(component_id.clone(), *class_id);
            }
            StagedChange::Deinstall { component_id } => {
                components.remove(component_id);
            }
        }
    }
}

impl ClassResolver for MockSubsystem {
    fn resolve_class(
        &self,
        class_id: ClassId,
    ) -> Result<Box<dyn ClassHandle + '_>, SubsystemError> {
        self.check_class(class_id)?;
        Ok(Box::new(MockClass {
            subsystem: self,
            class_id,
            _ref: self.net.acquire(HandleKind::Class),
        }))
    }

    fn resolve_class_setup(
        &self,
        class_id: ClassId,
    ) -> Result<Box<dyn ClassSetup + '_>, SubsystemError> {
        self.check_class(class_id)?;
        Ok(Box::new(MockClassSetup {
            subsystem: self,
            class_id,
            _ref: self.net.acquire(HandleKind::ClassSetup),
        }))
    }
}

impl ConfigSubsystem for MockSubsystem {
    fn connect(&self) -> Result<(), SubsystemError> {
        self.net.record(MockEvent::Connect);
        if let Some(code) = self.net.machine().failures.connect {
            return Err(SubsystemError::new(code, "runtime initialization failed"));
        }
        let mut session = self.session();
        if !session.connected {
            session.connected = true;
            self.net.machine().connected += 1;
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.net.record(MockEvent::Disconnect);
        let mut session = self.session();
        if session.connected {
            session.connected = false;
            self.net.machine().connected -= 1;
        }
    }

    fn acquire_write_lock(&self, _timeout: Duration, owner: &str) -> Result<(), LockAcquireError> {
        let mut m = self.net.machine();
        m.events.push(MockEvent::AcquireWriteLock);
        if let Some(code) = m.failures.acquire_lock {
            return Err(LockAcquireError::Failed(SubsystemError::new(
                code,
                "lock acquisition failed",
            )));
        }
        if let Some(holder) = &m.lock_holder {
            return Err(LockAcquireError::Contended {
                holder: Some(holder.clone()),
            });
        }
        m.lock_holder = Some(owner.to_owned());
        drop(m);
        self.session().holds_lock = true;
        Ok(())
    }

    fn release_write_lock(&self) -> Result<(), SubsystemError> {
        self.net.record(MockEvent::ReleaseWriteLock);
        if let Some(code) = self.net.machine().failures.release_lock {
            return Err(SubsystemError::new(code, "lock release failed"));
        }
        let mut session = self.session();
        if !session.holds_lock {
            return Err(SubsystemError::new(
                codes::NO_WRITE_LOCK,
                "session does not hold the write lock",
            ));
        }
        session.holds_lock = false;
        self.net.machine().lock_holder = None;
        Ok(())
    }

    fn initialize(&self) -> Result<(), SubsystemError> {
        self.net.record(MockEvent::Initialize);
        if let Some(code) = self.net.machine().failures.initialize {
            return Err(SubsystemError::new(code, "store initialization failed"));
        }
        let mut session = self.session();
        if session.initialized {
            return Err(SubsystemError::new(
                codes::ALREADY_INITIALIZED,
                "store already initialized",
            ));
        }
        session.initialized = true;
        Ok(())
    }

    fn uninitialize(&self) -> Result<(), SubsystemError> {
        self.net.record(MockEvent::Uninitialize);
        let mut session = self.session();
        session.initialized = false;
        session.staged.clear();
        drop(session);
        if let Some(code) = self.net.machine().failures.uninitialize {
            return Err(SubsystemError::new(code, "store uninitialize failed"));
        }
        Ok(())
    }

    fn find_component(
        &self,
        component_id: &str,
    ) -> Result<Option<Box<dyn ComponentHandle + '_>>, SubsystemError> {
        self.net
            .record(MockEvent::FindComponent(component_id.to_owned()));
        self.require_initialized()?;
        if let Some(code) = self.net.machine().failures.find_component {
            return Err(SubsystemError::new(code, "component lookup failed"));
        }
        Ok(self.view().get(component_id).map(|class_id| {
            Box::new(MockComponent {
                component_id: component_id.to_owned(),
                class_id: *class_id,
                _ref: self.net.acquire(HandleKind::Component),
            }) as Box<dyn ComponentHandle + '_>
        }))
    }

    fn list_components(&self) -> Result<Vec<ComponentInfo>, SubsystemError> {
        self.require_initialized()?;
        Ok(self
            .view()
            .into_iter()
            .map(|(component_id, class_id)| ComponentInfo {
                component_id,
                class_id,
            })
            .collect())
    }

    fn apply_changes(&self) -> Result<(), SubsystemError> {
        self.net.record(MockEvent::Apply);
        self.require_initialized()?;
        self.require_write_lock()?;
        if let Some(code) = self.net.machine().failures.apply {
            return Err(SubsystemError::new(code, "apply failed"));
        }
        let staged = std::mem::take(&mut self.session().staged);
        if !staged.is_empty() {
            let mut m = self.net.machine();
            apply_staged(&mut m.components, &staged);
            m.commits += 1;
        }
        Ok(())
    }
}

struct MockComponent<'a> {
    component_id: String,
    class_id: ClassId,
    _ref: HandleRef<'a>,
}

impl ComponentHandle for MockComponent<'_> {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn class_id(&self) -> Result<ClassId, SubsystemError> {
        Ok(self.class_id)
    }
}

struct MockClass<'a> {
    subsystem: &'a MockSubsystem,
    class_id: ClassId,
    _ref: HandleRef<'a>,
}

impl ClassHandle for MockClass<'_> {
    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn setup(&self) -> Result<Box<dyn ClassSetup + '_>, SubsystemError> {
        Ok(Box::new(MockClassSetup {
            subsystem: self.subsystem,
            class_id: self.class_id,
            _ref: self.subsystem.net.acquire(HandleKind::ClassSetup),
        }))
    }
}

struct MockClassSetup<'a> {
    subsystem: &'a MockSubsystem,
    class_id: ClassId,
    _ref: HandleRef<'a>,
}

impl InstallHandler for MockClassSetup<'_> {
    fn install(
        &self,
        component_id: &str,
        _obo: &OboToken,
        _flags: u32,
        _upgrade_from_build: u32,
        _answer_file: Option<&AnswerFile>,
    ) -> Result<Box<dyn ComponentHandle + '_>, SubsystemError> {
        let sub = self.subsystem;
        sub.net.record(MockEvent::Install(component_id.to_owned()));
        sub.require_initialized()?;
        sub.require_write_lock()?;
        if let Some(code) = sub.net.machine().failures.install.get(component_id) {
            return Err(SubsystemError::new(*code, "class installer rejected component"));
        }
        if sub.view().contains_key(component_id) {
            return Err(SubsystemError::new(
                codes::ALREADY_EXISTS,
                format!("component '{component_id}' is already installed"),
            ));
        }
        sub.session().staged.push(StagedChange::Install {
            component_id: component_id.to_owned(),
            class_id: self.class_id,
        });
        Ok(Box::new(MockComponent {
            component_id: component_id.to_owned(),
            class_id: self.class_id,
            _ref: sub.net.acquire(HandleKind::Component),
        }))
    }
}

impl DeinstallHandler for MockClassSetup<'_> {
    fn deinstall(
        &self,
        component: &dyn ComponentHandle,
        _obo: &OboToken,
        _flags: u32,
    ) -> Result<(), SubsystemError> {
        let sub = self.subsystem;
        let component_id = component.component_id();
        sub.net.record(MockEvent::Deinstall(component_id.to_owned()));
        sub.require_initialized()?;
        sub.require_write_lock()?;
        if let Some(code) = sub.net.machine().failures.deinstall.get(component_id) {
            return Err(SubsystemError::new(*code, "class installer refused removal"));
        }
        sub.session().staged.push(StagedChange::Deinstall {
            component_id: component_id.to_owned(),
        });
        Ok(())
    }
}

/// Package stager that records requests instead of copying files.
#[derive(Debug, Default)]
pub struct MockStager {
    staged: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail_with: Mutex<Option<u32>>,
}

impl MockStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent request with this OS error code.
    pub fn fail_with(&self, os_code: u32) {
        *self.fail_with.lock().unwrap_or_else(PoisonError::into_inner) = Some(os_code);
    }

    /// `(package_path, sibling_dir)` for every successful request.
    pub fn staged(&self) -> Vec<(PathBuf, PathBuf)> {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PackageStager for MockStager {
    fn stage_install_package(
        &self,
        package_path: &Path,
        sibling_dir: &Path,
    ) -> Result<PathBuf, StagingError> {
        if let Some(code) = *self.fail_with.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(StagingError::new(code, "mock staging failure"));
        }
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        staged.push((package_path.to_owned(), sibling_dir.to_owned()));
        Ok(PathBuf::from(format!("oem{}.inf", staged.len() - 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(net: &MockNetwork) -> MockSubsystem {
        let sub = net.create();
        sub.connect().unwrap();
        sub.acquire_write_lock(Duration::from_secs(1), "test").unwrap();
        sub.initialize().unwrap();
        sub
    }

    #[test]
    fn handles_are_counted_and_released() {
        let net = MockNetwork::new();
        let sub = open(&net);
        {
            let class = sub.resolve_class(ClassId::NET_TRANS).unwrap();
            let _setup = class.setup().unwrap();
            assert_eq!(net.live_handles(), 2);
        }
        assert_eq!(net.live_handles(), 0);
        assert_eq!(net.total_acquisitions(), 2);
    }

    #[test]
    fn staged_install_is_invisible_to_other_sessions_until_apply() {
        let net = MockNetwork::new();
        let sub = open(&net);
        {
            let setup = sub.resolve_class_setup(ClassId::NET_SERVICE).unwrap();
            setup
                .install("ms_svc", &OboToken::user(), 0, 0, None)
                .unwrap();
        }
        assert!(sub.find_component("ms_svc").unwrap().is_some());
        assert!(!net.has_component("ms_svc"));

        sub.apply_changes().unwrap();
        assert!(net.has_component("ms_svc"));
        assert_eq!(net.commits(), 1);
    }

    #[test]
    fn uninitialize_discards_staged_changes() {
        let net = MockNetwork::new();
        let sub = open(&net);
        {
            let setup = sub.resolve_class_setup(ClassId::NET_SERVICE).unwrap();
            setup
                .install("ms_svc", &OboToken::user(), 0, 0, None)
                .unwrap();
        }
        sub.uninitialize().unwrap();
        assert!(!net.has_component("ms_svc"));
        assert_eq!(net.commits(), 0);
    }

    #[test]
    fn install_without_write_lock_is_refused() {
        let net = MockNetwork::new();
        let sub = net.create();
        sub.connect().unwrap();
        sub.initialize().unwrap();
        let setup = sub.resolve_class_setup(ClassId::NET).unwrap();
        let err = setup
            .install("ms_tap", &OboToken::user(), 0, 0, None)
            .err()
            .unwrap();
        assert_eq!(err.code, codes::NO_WRITE_LOCK);
    }

    #[test]
    fn calls_before_initialize_fail() {
        let net = MockNetwork::new();
        let sub = net.create();
        sub.connect().unwrap();
        let err = sub.find_component("x").err().unwrap();
        assert_eq!(err.code, codes::NOT_INITIALIZED);
    }

    #[test]
    fn unknown_class_is_refused() {
        let net = MockNetwork::new();
        net.remove_class(ClassId::NET_CLIENT);
        let sub = open(&net);
        let err = sub.resolve_class_setup(ClassId::NET_CLIENT).err().unwrap();
        assert_eq!(err.code, codes::INVALID_ARG);
        assert_eq!(net.total_acquisitions(), 0);
    }

    #[test]
    fn mock_stager_records_and_fails_on_demand() {
        let stager = MockStager::new();
        let staged = stager
            .stage_install_package(Path::new("/pkg/tap.inf"), Path::new("/pkg"))
            .unwrap();
        assert_eq!(staged, PathBuf::from("oem0.inf"));
        assert_eq!(stager.staged().len(), 1);

        stager.fail_with(5);
        let err = stager
            .stage_install_package(Path::new("/pkg/tap.inf"), Path::new("/pkg"))
            .unwrap_err();
        assert_eq!(err.os_code, 5);
        assert_eq!(stager.staged().len(), 1);
    }
}
