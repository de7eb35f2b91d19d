/*!
 * Trigger Tests
 * Event callbacks, transitions and dispatch end to end
 */

use lifecycle_kernel::{LifecycleManager, Stage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Manager = LifecycleManager<serde_json::Value>;

#[test]
fn test_trigger_flips_flag() {
    let manager = Manager::new();
    manager
        .register_stage(Stage::new("init").with_next(["execute"]))
        .unwrap();
    manager
        .register_stage(Stage::new("execute").with_prev(["init"]))
        .unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let f = flag.clone();
    manager
        .register_event("execute", "start", move |_| f.store(true, Ordering::SeqCst))
        .unwrap();

    assert!(manager.trigger("execute", "start", None));
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn test_trigger_missing_stage_fires_nothing() {
    let manager = Manager::builder().with_base_stages().build().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    manager
        .register_event("init", "e", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(!manager.trigger("missing-stage", "e", None));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_trigger_passes_data() {
    let manager: LifecycleManager<String> = LifecycleManager::builder()
        .with_base_stages()
        .build()
        .unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();
    manager
        .register_event("execute", "start", move |data| {
            s.lock().push(data.cloned());
        })
        .unwrap();

    manager.trigger("execute", "start", Some("web".to_string()));
    manager.trigger("execute", "start", None);
    assert_eq!(*seen.lock(), vec![Some("web".to_string()), None]);
}

#[test]
fn test_transition_runs_hooks_in_order() {
    let manager = Manager::builder().with_base_stages().build().unwrap();
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for name in ["init", "execute"] {
        let stage = manager.stage(name).unwrap();
        let enter_log = log.clone();
        let exit_log = log.clone();
        stage
            .on_enter(move || enter_log.lock().push(format!("enter {}", name)))
            .on_exit(move || exit_log.lock().push(format!("exit {}", name)));
    }

    manager.transition_to("init").unwrap();
    manager.transition_to("execute").unwrap();

    assert_eq!(
        *log.lock(),
        vec!["enter init", "exit init", "enter execute"]
    );
}

#[tokio::test]
async fn test_dispatch_through_auto_scaled_stage() {
    let manager = Manager::new();
    let stage = manager.define_stage("jobs").unwrap();
    stage.auto_scale(1).unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let d = done.clone();
        manager
            .dispatch("jobs", move || {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    }

    for _ in 0..200 {
        if done.load(Ordering::SeqCst) == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(done.load(Ordering::SeqCst), 5);

    let stats = stage.pool().unwrap().stats();
    assert_eq!(stats.dispatched, 5);
    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_dispatch_to_missing_stage() {
    let manager = Manager::new();
    assert!(manager.dispatch("missing", || {}).await.is_err());
}
