//! Tests for tokio spawner and background operations

use std::sync::Arc;
use std::time::Duration;

use prometheus_frame_scheduler::builders::RuntimeBuilder;
use prometheus_frame_scheduler::core::{
    BackgroundExecutor, OperationError, SchedulerError, UnitState,
};
use prometheus_frame_scheduler::runtime::{TokioSpawner, UnitStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_start() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let task = spawner.start(Box::pin(async move {
        tx.send(123).unwrap();
    }));

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(task.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_stop() {
    let spawner = TokioSpawner::current().expect("inside a runtime");
    let task = spawner.start(Box::pin(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }));
    task.stop();
    task.stop();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(task.is_finished());
}

#[test]
fn test_spawned_operation_completes_through_frames() {
    let spawner = TokioSpawner::with_worker_threads(1).unwrap();
    let mut runtime = RuntimeBuilder::new()
        .with_gate("net", 1)
        .with_executor(Arc::new(spawner))
        .build()
        .unwrap();

    let unit = runtime
        .spawn_background(
            |attempt| async move { Ok(serde_json::json!({ "attempt": attempt })) },
            Some("net"),
        )
        .unwrap();
    let id = runtime.schedule(unit);
    let handle = runtime.scheduler().find(id).unwrap();

    for _ in 0..500 {
        if handle.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
        runtime.tick(0.002);
    }
    assert_eq!(handle.result(), Some(serde_json::json!({ "attempt": 1 })));
    assert_eq!(runtime.gate("net").unwrap().active(), 0);
}

#[test]
fn test_spawn_background_needs_executor() {
    let runtime = RuntimeBuilder::new().build().unwrap();
    let result = runtime.spawn_background(
        |_| async { Err::<serde_json::Value, _>(OperationError::new("never runs")) },
        None,
    );
    assert!(matches!(result, Err(SchedulerError::Validation(_))));
}

#[test]
fn test_unit_status_serializes() {
    let runtime = RuntimeBuilder::new().build().unwrap();
    let id = runtime.schedule(prometheus_frame_scheduler::core::Unit::from_fn(|| {}));
    let status = runtime.unit_status(id).unwrap();
    assert_eq!(status.state, UnitState::Completed);

    let json = serde_json::to_string(&status).unwrap();
    let back: UnitStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, status);
}
