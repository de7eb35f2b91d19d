/*!
 * Shutdown Tests
 * Signal listener, stop deadlines and registry cleanup
 */

use lifecycle_kernel::{LifecycleError, LifecycleManager, ManagedProcess, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;

type Manager = LifecycleManager<serde_json::Value>;

fn sleeping_process(name: &str) -> ManagedProcess {
    ManagedProcess::custom(name, || async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    })
}

#[tokio::test]
async fn test_signal_listener_stops_everything() {
    let manager = Arc::new(
        Manager::builder()
            .with_base_stages()
            .with_stop_timeout(Duration::from_secs(1))
            .build()
            .unwrap(),
    );
    manager.register_process(sleeping_process("a")).unwrap();
    manager.register_process(sleeping_process("b")).unwrap();
    manager.start_all().await.unwrap();
    assert!(manager.process_info().iter().all(|p| p.running));

    let listener = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.listen_for_signals().await })
    };

    manager
        .signal_sender()
        .send(ShutdownSignal::Terminate)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), manager.wait_for_shutdown())
        .await
        .expect("done queue should close after a signal");
    listener.await.unwrap().unwrap();

    assert!(manager.process_names().is_empty());
}

#[tokio::test]
async fn test_listener_survives_events() {
    let manager = Arc::new(Manager::builder().with_base_stages().build().unwrap());
    manager.register_event("init", "ping", |_| {}).unwrap();

    let listener = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.listen_for_signals().await })
    };

    for _ in 0..10 {
        manager.trigger("init", "ping", None);
        tokio::task::yield_now().await;
    }
    assert!(!listener.is_finished());
    assert!(!manager.is_shutdown());

    manager.raise_signal(ShutdownSignal::Requested).unwrap();
    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(manager.is_shutdown());
}

#[tokio::test]
async fn test_second_listener_is_rejected() {
    let manager = Arc::new(Manager::new());
    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.listen_for_signals().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = manager.listen_for_signals().await.unwrap_err();
    assert!(matches!(err, LifecycleError::StateConflict(_)));

    manager.shutdown();
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_keeps_registry_and_restart_starts_again() {
    let manager = Manager::new();
    manager.register_process(sleeping_process("svc")).unwrap();

    manager.start().await.unwrap();
    manager.stop().await.unwrap();
    let process = manager.process("svc").unwrap();
    assert!(!process.is_running());

    manager.restart().await.unwrap();
    assert!(process.is_running());
    assert_eq!(process.info().starts, 2);

    manager.stop_all().await.unwrap();
    assert!(manager.process("svc").is_none());
}
