/*!
 * Registry Tests
 * Process, stage and event registration through the manager
 */

use lifecycle_kernel::{
    EntityKind, LifecycleError, LifecycleManager, ManagedProcess, Stage,
};
use pretty_assertions::assert_eq;

type Manager = LifecycleManager<serde_json::Value>;

fn noop_process(name: &str) -> ManagedProcess {
    ManagedProcess::custom(name, || async { Ok(()) })
}

#[test]
fn test_duplicate_process_name() {
    let manager = Manager::new();
    manager.register_process(noop_process("p")).unwrap();

    let err = manager.register_process(noop_process("p")).unwrap_err();
    assert_eq!(
        err,
        LifecycleError::AlreadyExists {
            kind: EntityKind::Process,
            name: "p".to_string()
        }
    );
    assert_eq!(manager.process_names(), vec!["p"]);
}

#[test]
fn test_event_on_missing_stage() {
    let manager = Manager::new();
    let err = manager
        .register_event("nowhere", "start", |_| {})
        .unwrap_err();
    assert_eq!(err.error_type(), "not_found");
}

#[test]
fn test_duplicate_event() {
    let manager = Manager::builder().with_base_stages().build().unwrap();
    manager.register_event("init", "start", |_| {}).unwrap();
    let err = manager.register_event("init", "start", |_| {}).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::AlreadyExists {
            kind: EntityKind::Event,
            ..
        }
    ));

    manager.remove_event("init", "start").unwrap();
    manager.register_event("init", "start", |_| {}).unwrap();
}

#[test]
fn test_stage_graph_membership() {
    let manager = Manager::new();
    let stage = manager
        .register_stage(Stage::new("init").with_next(["execute"]))
        .unwrap();

    assert!(stage.can_transition_to("execute"));
    assert!(!stage.can_transition_to("other"));
}

#[test]
fn test_stage_and_process_info() {
    let manager = Manager::builder().with_base_stages().build().unwrap();
    manager.register_process(noop_process("idle")).unwrap();

    let stages = manager.stage_info();
    assert_eq!(stages.len(), 3);
    assert!(stages.iter().all(|s| s.kind == "base"));

    let processes = manager.process_info();
    assert_eq!(processes.len(), 1);
    assert!(!processes[0].running);
    assert_eq!(manager.status(), "process 'idle' running: false");
}
