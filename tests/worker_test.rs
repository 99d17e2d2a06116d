//! Producer + worker end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use litejob::codec::{self, Arguments, FailureKind, Value};
use litejob::{Client, Db, Error, JobResult, Registry, Status, Worker, WorkerConfig};
use serde_json::json;

async fn test_db() -> Arc<Db> {
    let db = Db::in_memory().await.expect("failed to open in-memory db");
    db.migrate().await.expect("failed to migrate");
    Arc::new(db)
}

fn registry() -> Registry {
    Registry::new()
        .register("add", |args: Arguments| {
            Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
        })
        .register("process_data", |args: Arguments| {
            let data: Vec<i64> = args.get(0)?;
            let multiplier: i64 = args.kwarg_or("multiplier", 1)?;
            Ok(json!(data.iter().map(|x| x * multiplier).collect::<Vec<_>>()))
        })
        .register("function_with_kwargs", |args: Arguments| {
            let a: i64 = args.get(0)?;
            let b: i64 = args.kwarg_or("b", 10)?;
            let c: i64 = args.kwarg_or("c", 20)?;
            Ok(json!(a + b + c))
        })
        .register("raises", |_| Err(anyhow::anyhow!("Test error")))
        .register("panics", |_| panic!("worker bug"))
}

fn worker(db: &Arc<Db>, queue: &str) -> Worker {
    Worker::new(
        Arc::clone(db),
        queue,
        Arc::new(registry()),
        WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn add_and_process_data_complete_with_values() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");

    let first = client
        .enqueue("add", Arguments::new().arg(10).arg(20))
        .await
        .unwrap();
    let second = client
        .enqueue(
            "process_data",
            Arguments::new().arg(vec![1, 2, 3, 4]).kwarg("multiplier", 3),
        )
        .await
        .unwrap();

    let worker = worker(&db, "default");
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some((first, Status::Completed))
    );
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some((second, Status::Completed))
    );
    assert_eq!(worker.run_once().await.unwrap(), None);

    assert_eq!(
        client.get_result(first).await.unwrap(),
        JobResult::Completed(json!(30))
    );
    assert_eq!(
        client.get_result(second).await.unwrap(),
        JobResult::Completed(json!([3, 6, 9, 12]))
    );
}

#[tokio::test]
async fn keyword_defaults_and_overrides() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");

    let defaults = client
        .enqueue("function_with_kwargs", Arguments::new().arg(1))
        .await
        .unwrap();
    let overridden = client
        .enqueue(
            "function_with_kwargs",
            Arguments::new().arg(1).kwarg("b", 2).kwarg("c", 3),
        )
        .await
        .unwrap();

    let worker = worker(&db, "default");
    worker.run_once().await.unwrap();
    worker.run_once().await.unwrap();

    assert_eq!(
        client.get_result(defaults).await.unwrap(),
        JobResult::Completed(json!(31))
    );
    assert_eq!(
        client.get_result(overridden).await.unwrap(),
        JobResult::Completed(json!(6))
    );
}

#[tokio::test]
async fn status_moves_through_each_stage_in_order() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let worker = worker(&db, "default");

    let id = client
        .enqueue("add", Arguments::new().arg(1).arg(2))
        .await
        .unwrap();
    assert_eq!(client.get_result(id).await.unwrap(), JobResult::Pending);

    assert_eq!(worker.claim_next().await.unwrap(), Some(id));
    assert_eq!(client.get_result(id).await.unwrap(), JobResult::Running);
    assert!(client.get_job(id).await.unwrap().result.is_none());

    assert_eq!(worker.process(id).await.unwrap(), Status::Completed);
    assert_eq!(
        client.get_result(id).await.unwrap(),
        JobResult::Completed(json!(3))
    );
}

#[tokio::test]
async fn unregistered_function_fails_the_job() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");

    // The producer doesn't need to know what the worker has registered.
    let id = client
        .enqueue("not_a_function", Arguments::new().arg(1))
        .await
        .unwrap();

    let worker = worker(&db, "default");
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some((id, Status::Failed))
    );

    match client.get_result(id).await.unwrap() {
        JobResult::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::FunctionNotRegistered);
            assert!(failure.message.contains("not_a_function"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_job_does_not_block_the_queue() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");

    let bad = client.enqueue("raises", Arguments::new()).await.unwrap();
    let good = client
        .enqueue("add", Arguments::new().arg(2).arg(2))
        .await
        .unwrap();

    let worker = worker(&db, "default");
    let loop_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    wait_for_terminal(&client, good).await;
    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), loop_handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();

    match client.get_result(bad).await.unwrap() {
        JobResult::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Execution);
            assert_eq!(failure.message, "Test error");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(
        client.get_result(good).await.unwrap(),
        JobResult::Completed(json!(4))
    );
}

#[tokio::test]
async fn panicking_function_is_recorded_as_failure() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let id = client.enqueue("panics", Arguments::new()).await.unwrap();
    let next = client
        .enqueue("add", Arguments::new().arg(5).arg(7))
        .await
        .unwrap();

    let worker = worker(&db, "default");
    assert_eq!(worker.run_once().await.unwrap(), Some((id, Status::Failed)));
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some((next, Status::Completed))
    );

    match client.get_result(id).await.unwrap() {
        JobResult::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Panic);
            assert_eq!(failure.message, "worker bug");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn corrupt_payload_is_deserialization_failure() {
    let db = test_db().await;
    let job = db
        .insert_job("default", b"\x80\x04 definitely not json".to_vec())
        .await
        .unwrap();

    let worker = worker(&db, "default");
    assert_eq!(
        worker.run_once().await.unwrap(),
        Some((job.id, Status::Failed))
    );

    let client = Client::new(Arc::clone(&db), "default");
    match client.get_result(job.id).await.unwrap() {
        JobResult::Failed(failure) => assert_eq!(failure.kind, FailureKind::Deserialization),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn get_result_is_stable_on_terminal_jobs() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let id = client
        .enqueue("add", Arguments::new().arg(1).arg(1))
        .await
        .unwrap();
    worker(&db, "default").run_once().await.unwrap();

    let before = client.get_job(id).await.unwrap();
    for _ in 0..3 {
        assert_eq!(
            client.get_result(id).await.unwrap(),
            JobResult::Completed(json!(2))
        );
    }
    let after = client.get_job(id).await.unwrap();
    assert_eq!(before.updated_at, after.updated_at);
    assert_eq!(before.result, after.result);
}

#[tokio::test]
async fn get_result_for_unknown_id_is_not_found() {
    let db = test_db().await;
    let client = Client::new(db, "default");
    let err = client.get_result(litejob::JobId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn process_refuses_jobs_it_does_not_hold() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let id = client
        .enqueue("add", Arguments::new().arg(1).arg(1))
        .await
        .unwrap();

    // Never claimed, so still pending.
    let err = worker(&db, "default").process(id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(client.get_result(id).await.unwrap(), JobResult::Pending);
}

#[tokio::test]
async fn worker_only_sees_its_own_queue() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let other = client
        .enqueue_to("other", "add", Arguments::new().arg(1).arg(1))
        .await
        .unwrap();

    assert_eq!(worker(&db, "default").run_once().await.unwrap(), None);
    assert_eq!(client.get_result(other).await.unwrap(), JobResult::Pending);
    assert_eq!(
        worker(&db, "other").run_once().await.unwrap(),
        Some((other, Status::Completed))
    );
}

#[tokio::test]
async fn idle_worker_stops_on_shutdown() {
    let db = test_db().await;
    let worker = Worker::new(
        Arc::clone(&db),
        "default",
        Arc::new(registry()),
        WorkerConfig::default().with_poll_interval(Duration::from_secs(60)),
    );

    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The long poll interval must not delay shutdown.
    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
    assert!(worker.is_stopping());
}

#[tokio::test]
async fn raw_result_bytes_decode_to_stored_value() {
    let db = test_db().await;
    let client = Client::new(Arc::clone(&db), "default");
    let id = client
        .enqueue(
            "process_data",
            Arguments::new().arg(vec![5]).kwarg("multiplier", 2),
        )
        .await
        .unwrap();
    worker(&db, "default").run_once().await.unwrap();

    let job = client.get_job(id).await.unwrap();
    let value: Value = codec::decode(job.result.as_deref().unwrap()).unwrap();
    assert_eq!(value, json!([10]));
}

fn worker_with(db: &Arc<Db>, max_consecutive_errors: Option<u32>) -> Worker {
    let config = WorkerConfig {
        max_consecutive_errors,
        ..WorkerConfig::default().with_poll_interval(Duration::from_millis(1))
    };
    Worker::new(Arc::clone(db), "default", Arc::new(registry()), config)
}

#[tokio::test]
async fn run_gives_up_after_max_consecutive_store_errors() {
    let db = test_db().await;
    db.close().await;

    let worker = worker_with(&db, Some(3));
    let err = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker kept polling past its error limit")
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)), "got {err:?}");
}

#[tokio::test]
async fn run_keeps_polling_through_store_errors_without_a_limit() {
    let db = test_db().await;
    db.close().await;

    let worker = worker_with(&db, None);
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    // Well over the poll interval; the loop must still be alive.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    worker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
}

async fn wait_for_terminal(client: &Client, id: litejob::JobId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = client.get_result(id).await.unwrap().status();
            if status.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time");
}
