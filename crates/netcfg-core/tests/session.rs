//! Session-level properties checked against the refcount-tracking mock.
//!
//! Every scenario runs complete sessions through `SessionOrchestrator` and then
//! inspects the mock machine: committed components, lock state, the ordered
//! event log and live handle counts.

use netcfg_core::codes;
use netcfg_core::mock::{HandleKind, MockEvent, MockNetwork, MockStager};
use netcfg_core::{
    ClassId, ConfigStoreHandle, ErrorKind, SessionOrchestrator, SubsystemProvider,
    TransactionResult,
};
use std::path::Path;
use std::time::Duration;

fn orchestrator(net: &MockNetwork) -> SessionOrchestrator<MockNetwork> {
    SessionOrchestrator::new(net.clone(), Box::new(MockStager::new()))
}

fn assert_no_leaks(net: &MockNetwork) {
    assert_eq!(net.live_handles(), 0, "handle leak: {:?}", net.events());
    let acquired = net
        .events()
        .iter()
        .filter(|e| matches!(e, MockEvent::Acquire(_)))
        .count();
    let released = net
        .events()
        .iter()
        .filter(|e| matches!(e, MockEvent::Release(_)))
        .count();
    assert_eq!(acquired, released);
}

#[test]
fn init_failure_after_lock_leaves_lock_free() {
    let net = MockNetwork::new();
    net.fail_initialize(codes::FAIL);

    let result = orchestrator(&net).run_uninstall("X", "ms_tcpip");
    assert_eq!(result.kind(), Some(ErrorKind::StoreInitFailed));
    assert!(net.lock_holder().is_none());

    // Another actor can take the lock straight away.
    net.clear_failures();
    let other =
        ConfigStoreHandle::open(net.create(), true, "Y", Duration::from_millis(10)).unwrap();
    assert_eq!(other.lock_holder_name(), Some("Y"));
    other.close().unwrap();
}

#[test]
fn failures_before_apply_commit_nothing() {
    let net = MockNetwork::new();
    net.add_component("ms_tcpip", ClassId::NET_TRANS);
    let before = net.components();

    net.reject_install("tap0901", 0x8007_0490);
    let r1 = orchestrator(&net).run_install("X", "tap0901", ClassId::NET, None);
    assert_eq!(r1.kind(), Some(ErrorKind::InstallRejected));

    net.reject_deinstall("ms_tcpip", codes::IN_USE);
    let r2 = orchestrator(&net).run_uninstall("X", "ms_tcpip");
    assert_eq!(r2.kind(), Some(ErrorKind::DeinstallRejected));

    net.remove_class(ClassId::NET_CLIENT);
    let r3 = orchestrator(&net).run_install("X", "ms_msclient", ClassId::NET_CLIENT, None);
    assert_eq!(r3.kind(), Some(ErrorKind::ClassNotSupported));

    let r4 = orchestrator(&net).run_uninstall("X", "missing");
    assert_eq!(r4.kind(), Some(ErrorKind::ComponentNotFound));

    for r in [&r1, &r2, &r3, &r4] {
        assert!(!r.committed());
    }
    assert_eq!(net.components(), before);
    assert_eq!(net.commits(), 0);
    assert_eq!(net.count(&MockEvent::Apply), 0);
}

#[test]
fn every_outcome_releases_every_handle() {
    let net = MockNetwork::new();
    net.add_component("ms_tcpip", ClassId::NET_TRANS);
    net.add_component("ms_server", ClassId::NET_SERVICE);
    let orch = orchestrator(&net);

    orch.run_install("X", "ms_pacer", ClassId::NET_SERVICE, None);
    assert_no_leaks(&net);

    net.reject_install("bad", codes::FAIL);
    orch.run_install("X", "bad", ClassId::NET_SERVICE, None);
    assert_no_leaks(&net);

    orch.run_uninstall("X", "ms_tcpip");
    assert_no_leaks(&net);

    net.reject_deinstall("ms_server", codes::FAIL);
    orch.run_uninstall("X", "ms_server");
    assert_no_leaks(&net);

    net.clear_failures();
    net.fail_apply(codes::FAIL);
    orch.run_uninstall("X", "ms_server");
    assert_no_leaks(&net);

    assert!(net.total_acquisitions() > 0);
}

#[test]
fn close_runs_once_per_open_even_on_failure() {
    let net = MockNetwork::new();
    net.add_component("ms_tcpip", ClassId::NET_TRANS);
    net.fail_apply(codes::FAIL);
    let orch = orchestrator(&net);

    orch.run_install("X", "a", ClassId::NET_SERVICE, None);
    orch.run_uninstall("X", "ms_tcpip");
    orch.run_uninstall("X", "missing");

    let opens = net.count(&MockEvent::Initialize);
    assert_eq!(opens, 3);
    assert_eq!(net.count(&MockEvent::Uninitialize), opens);
    assert_eq!(net.count(&MockEvent::ReleaseWriteLock), opens);
    assert_eq!(net.count(&MockEvent::Disconnect), net.count(&MockEvent::Connect));
    assert!(!net.is_connected());
}

#[test]
fn concurrent_writer_sees_holder_name() {
    let net = MockNetwork::new();
    let first = ConfigStoreHandle::open(net.create(), true, "X", Duration::from_secs(5)).unwrap();

    let err = ConfigStoreHandle::open(net.create(), true, "Y", Duration::from_secs(5))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::LockContention);
    assert_eq!(err.lock_holder(), Some("X"));
    assert!(err.kind().is_retryable());

    let result = orchestrator(&net).run_install("Y", "ms_pacer", ClassId::NET_SERVICE, None);
    assert_eq!(result.lock_holder(), Some("X"));

    first.close().unwrap();
    assert!(orchestrator(&net)
        .run_install("Y", "ms_pacer", ClassId::NET_SERVICE, None)
        .is_applied());
}

#[test]
fn rejected_install_with_package_never_applies() {
    let net = MockNetwork::new();
    net.reject_install("tap0901", 0x8007_0490);
    let orch = orchestrator(&net);

    let result = orch.run_install(
        "X",
        "tap0901",
        ClassId::NET,
        Some(Path::new("/drivers/tap/OemVista.inf")),
    );
    match &result {
        TransactionResult::Failed(e) => {
            assert_eq!(e.kind(), ErrorKind::InstallRejected);
            assert_eq!(e.code(), Some(0x8007_0490));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(net.count(&MockEvent::Apply), 0);
}

#[test]
fn uninstall_of_absent_component_never_resolves_setup() {
    let net = MockNetwork::new();
    let result = orchestrator(&net).run_uninstall("X", "ghost");

    assert_eq!(result.kind(), Some(ErrorKind::ComponentNotFound));
    assert!(result.code().is_none());
    assert!(!net
        .events()
        .iter()
        .any(|e| matches!(e, MockEvent::Acquire(HandleKind::ClassSetup | HandleKind::Class))));
}

#[test]
fn install_then_uninstall_round_trip() {
    let net = MockNetwork::new();
    net.add_component("ms_tcpip", ClassId::NET_TRANS);
    let orch = orchestrator(&net);

    let installed = orch.run_install(
        "X",
        "tap0901",
        ClassId::NET,
        Some(Path::new("/drivers/tap/OemVista.inf")),
    );
    assert!(installed.is_applied(), "{installed:?}");
    assert!(net.has_component("tap0901"));

    let removed = orch.run_uninstall("X", "tap0901");
    assert!(removed.is_applied(), "{removed:?}");

    let remaining: Vec<_> = net.components().into_keys().collect();
    assert_eq!(remaining, vec!["ms_tcpip".to_owned()]);
    assert_eq!(net.commits(), 2);
    assert_no_leaks(&net);
}
