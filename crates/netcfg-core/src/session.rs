use crate::config::SessionConfig;
use crate::handle::ConfigStoreHandle;
use crate::staging::PackageStager;
use crate::subsystem::{ComponentInfo, ConfigSubsystem, SubsystemProvider};
use crate::transaction::ComponentTransaction;
use crate::types::{ClassId, ComponentDescriptor};
use crate::{ErrorKind, NetCfgError};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of one locked session.
#[derive(Debug)]
pub enum TransactionResult {
    /// The change set was committed and the store torn down cleanly.
    Applied,
    /// Nothing was committed.
    Failed(NetCfgError),
    /// The change set was committed, but closing the store failed. The error
    /// is always [`NetCfgError::PostApplyCleanupFailed`].
    CleanupFailed(NetCfgError),
}

impl TransactionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransactionResult::Applied)
    }

    /// Whether the mutation reached the store, regardless of teardown.
    pub fn committed(&self) -> bool {
        matches!(
            self,
            TransactionResult::Applied | TransactionResult::CleanupFailed(_)
        )
    }

    pub fn error(&self) -> Option<&NetCfgError> {
        match self {
            TransactionResult::Applied => None,
            TransactionResult::Failed(e) | TransactionResult::CleanupFailed(e) => Some(e),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error().map(NetCfgError::kind)
    }

    pub fn code(&self) -> Option<u32> {
        self.error().and_then(NetCfgError::code)
    }

    pub fn lock_holder(&self) -> Option<&str> {
        self.error().and_then(NetCfgError::lock_holder)
    }

    pub fn into_result(self) -> Result<(), NetCfgError> {
        match self {
            TransactionResult::Applied => Ok(()),
            TransactionResult::Failed(e) | TransactionResult::CleanupFailed(e) => Err(e),
        }
    }
}

/// Runs one transaction per locked session: open with the write lock, run,
/// close. The store is closed exactly once per successful open, whatever the
/// transaction did.
pub struct SessionOrchestrator<P: SubsystemProvider> {
    provider: P,
    stager: Box<dyn PackageStager>,
    config: SessionConfig,
}

impl<P: SubsystemProvider> SessionOrchestrator<P> {
    pub fn new(provider: P, stager: Box<dyn PackageStager>) -> Self {
        Self::with_config(provider, stager, SessionConfig::default())
    }

    pub fn with_config(provider: P, stager: Box<dyn PackageStager>, config: SessionConfig) -> Self {
        Self {
            provider,
            stager,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Install `component_id` of class `class_id`, staging `inf_path` first
    /// when given.
    pub fn run_install(
        &self,
        app_name: &str,
        component_id: &str,
        class_id: ClassId,
        inf_path: Option<&Path>,
    ) -> TransactionResult {
        let mut descriptor = ComponentDescriptor::new(component_id, class_id);
        descriptor.inf_path = inf_path.map(Path::to_path_buf);
        self.run(app_name, ComponentTransaction::Install(&descriptor))
    }

    pub fn run_uninstall(&self, app_name: &str, component_id: &str) -> TransactionResult {
        self.run(app_name, ComponentTransaction::Uninstall { component_id })
    }

    pub fn run(&self, app_name: &str, transaction: ComponentTransaction<'_>) -> TransactionResult {
        let store = match ConfigStoreHandle::open(
            self.provider.create(),
            true,
            app_name,
            self.config.lock_timeout,
        ) {
            Ok(store) => store,
            Err(e) => {
                warn!("cannot open configuration store: {e}");
                return TransactionResult::Failed(e);
            }
        };

        let outcome = transaction.run(&store, self.stager.as_ref());
        let closed = store.close();

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!(
                    "session for '{}' applied",
                    transaction.component_id()
                );
                TransactionResult::Applied
            }
            (Ok(()), Err(e)) => {
                warn!("changes applied but teardown failed: {e}");
                TransactionResult::CleanupFailed(NetCfgError::PostApplyCleanupFailed(e))
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("teardown after failed transaction also failed: {close_err}");
                }
                TransactionResult::Failed(e)
            }
        }
    }

    /// List installed components in a read-only session (no write lock).
    pub fn list_components(&self, app_name: &str) -> Result<Vec<ComponentInfo>, NetCfgError> {
        let store = ConfigStoreHandle::open(
            self.provider.create(),
            false,
            app_name,
            self.config.lock_timeout,
        )?;
        let listed = store.subsystem().list_components();
        let closed = store.close();
        let components = listed.map_err(NetCfgError::StoreInitFailed)?;
        closed.map_err(NetCfgError::CloseFailed)?;
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use crate::mock::{MockEvent, MockNetwork, MockStager};
    use std::sync::Arc;

    fn orchestrator(net: &MockNetwork) -> SessionOrchestrator<MockNetwork> {
        SessionOrchestrator::new(net.clone(), Box::new(MockStager::new()))
    }

    #[test]
    fn install_applies_and_closes_once() {
        let net = MockNetwork::new();
        let result = orchestrator(&net).run_install("X", "ms_pacer", ClassId::NET_SERVICE, None);

        assert!(result.is_applied());
        assert!(result.committed());
        assert!(net.has_component("ms_pacer"));
        assert_eq!(net.count(&MockEvent::Uninitialize), 1);
        assert_eq!(net.count(&MockEvent::Disconnect), 1);
        assert!(net.lock_holder().is_none());
    }

    #[test]
    fn contention_skips_transaction() {
        let net = MockNetwork::new();
        let holder = ConfigStoreHandle::open(
            net.create(),
            true,
            "X",
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        net.clear_events();

        let result = orchestrator(&net).run_uninstall("Y", "ms_tcpip");
        assert_eq!(result.kind(), Some(ErrorKind::LockContention));
        assert_eq!(result.lock_holder(), Some("X"));
        assert!(!net
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::FindComponent(_) | MockEvent::Initialize)));

        holder.close().unwrap();
    }

    #[test]
    fn failed_transaction_still_closes_and_reports_transaction_error() {
        let net = MockNetwork::new();
        net.fail_apply(codes::FAIL);
        net.fail_uninitialize(codes::IN_USE);

        let result = orchestrator(&net).run_install("X", "ms_pacer", ClassId::NET_SERVICE, None);
        assert_eq!(result.kind(), Some(ErrorKind::ApplyFailed));
        assert_eq!(result.code(), Some(codes::FAIL));
        assert!(!result.committed());
        assert_eq!(net.count(&MockEvent::Uninitialize), 1);
        assert!(net.lock_holder().is_none());
    }

    #[test]
    fn teardown_failure_after_apply_is_distinct() {
        let net = MockNetwork::new();
        net.fail_release_lock(codes::FAIL);

        let result = orchestrator(&net).run_install("X", "ms_pacer", ClassId::NET_SERVICE, None);
        assert_eq!(result.kind(), Some(ErrorKind::PostApplyCleanupFailed));
        assert!(result.committed());
        assert!(!result.is_applied());
        assert!(net.has_component("ms_pacer"));
        assert!(!net.is_connected());
    }

    #[test]
    fn staging_failure_reaches_caller() {
        let net = MockNetwork::new();
        let stager = Arc::new(MockStager::new());
        stager.fail_with(32);
        let orch = SessionOrchestrator::new(net.clone(), Box::new(Arc::clone(&stager)));

        let result = orch.run_install(
            "X",
            "tap0901",
            ClassId::NET,
            Some(Path::new("/drivers/tap/OemVista.inf")),
        );
        assert_eq!(result.kind(), Some(ErrorKind::PackageStagingFailed));
        assert!(result.kind().unwrap().is_retryable());
        assert_eq!(net.count(&MockEvent::Uninitialize), 1);
        assert!(!net.has_component("tap0901"));
    }

    #[test]
    fn list_components_uses_read_only_session() {
        let net = MockNetwork::new();
        net.add_component("ms_tcpip", ClassId::NET_TRANS);

        let components = orchestrator(&net).list_components("X").unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_id, "ms_tcpip");
        assert_eq!(net.count(&MockEvent::AcquireWriteLock), 0);
        assert_eq!(net.count(&MockEvent::Uninitialize), 1);
    }

    #[test]
    fn into_result_maps_outcomes() {
        assert!(TransactionResult::Applied.into_result().is_ok());
        let failed = TransactionResult::Failed(NetCfgError::LockContention { holder: None });
        assert!(failed.into_result().is_err());
    }
}
