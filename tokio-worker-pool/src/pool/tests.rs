use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    test_util::{init_logging, TestJob},
    Error, PoolConfig, ShutdownMode, SystemError, WorkerPool,
};

fn launch(size: usize, max_tasks: Option<usize>, shutdown_mode: ShutdownMode) -> WorkerPool {
    init_logging();
    WorkerPool::launch(PoolConfig {
        pool_size: NonZeroUsize::new(size).unwrap(),
        max_tasks_per_worker: max_tasks.and_then(NonZeroUsize::new),
        shutdown_mode,
        thread_name_prefix: "test-worker".to_owned(),
    })
    .unwrap()
}

/// A job that signals once it's running and then blocks until released.
fn gate(id: usize) -> (TestJob, tokio::sync::oneshot::Receiver<()>, std::sync::mpsc::Sender<()>) {
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let job = TestJob::new(id, move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(id)
    });
    (job, started_rx, release_tx)
}

#[tokio::test]
async fn drop_pool() {
    let pool = launch(2, None, ShutdownMode::Wait);
    drop(pool);
}

#[tokio::test]
async fn basic() {
    let pool = launch(2, None, ShutdownMode::Wait);
    let completed = pool.submit(TestJob::ok(23)).await.unwrap();
    assert_eq!(completed.value, 23);

    let slow = TestJob::new(1, || {
        std::thread::sleep(Duration::from_millis(10));
        Ok(1)
    });
    let completed = pool.submit(slow).await.unwrap();
    assert!(completed.elapsed >= Duration::from_millis(10));

    match pool.submit(TestJob::fail(7)).await {
        Err(Error::Job(msg)) => assert_eq!(msg, "job 7 failed"),
        other => panic!("unexpected: {other:?}"),
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn concurrency_is_bounded_by_pool_size() {
    let pool = launch(3, Some(4), ShutdownMode::Wait);
    let running = Arc::new(AtomicUsize::new(0));
    let observed_max = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..30)
        .map(|i| {
            let running = Arc::clone(&running);
            let observed_max = Arc::clone(&observed_max);
            pool.submit(TestJob::new(i, move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                observed_max.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            }))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().value, i);
    }
    assert!(observed_max.load(Ordering::SeqCst) <= 3);
    let metrics = pool.metrics();
    assert!(metrics.peak_busy <= 3, "{metrics:?}");
    assert_eq!(metrics.jobs_dispatched, 30);
    assert_eq!(metrics.jobs_completed, 30);
    pool.shutdown().await;
}

#[tokio::test]
async fn workers_are_recycled() {
    let pool = launch(2, Some(2), ShutdownMode::Wait);
    let thread_names = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let thread_names = Arc::clone(&thread_names);
            pool.submit(TestJob::new(i, move || {
                let name = std::thread::current().name().unwrap().to_owned();
                thread_names.lock().unwrap().push(name);
                Ok(i)
            }))
        })
        .collect();
    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().value);
    }
    assert_eq!(values, (0..10).collect::<Vec<_>>());

    let thread_names = thread_names.lock().unwrap().clone();
    assert_eq!(thread_names.len(), 10, "every job ran exactly once");
    let distinct: HashSet<_> = thread_names.iter().collect();
    // no thread ran more than two jobs
    assert!(distinct.len() >= 5, "{thread_names:?}");
    assert!(distinct.iter().all(|n| n.starts_with("test-worker-")));

    let metrics = pool.metrics();
    assert!(metrics.workers_spawned >= 5, "{metrics:?}");
    assert!(metrics.workers_retired >= 4, "{metrics:?}");
    assert_eq!(metrics.workers_crashed, 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn retired_worker_threads_are_joined() {
    let pool = launch(1, Some(1), ShutdownMode::Wait);
    for i in 0..200 {
        assert_eq!(pool.submit(TestJob::ok(i)).await.unwrap().value, i);
    }
    let metrics = pool.metrics();
    assert!(metrics.workers_retired >= 199, "{metrics:?}");

    // wait for the last retired worker to exit
    for _ in 0..500 {
        let (retained, exited) = pool.slots.retained_threads();
        if retained == exited {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // spawning the next worker joins every exited one
    assert_eq!(pool.submit(TestJob::ok(200)).await.unwrap().value, 200);
    let (retained, _) = pool.slots.retained_threads();
    assert!(
        retained <= 2 * pool.pool_size(),
        "{retained} worker threads retained"
    );
    pool.shutdown().await;
}

#[tokio::test]
async fn panicking_job_is_isolated() {
    let pool = launch(2, None, ShutdownMode::Wait);
    let ok1 = pool.submit(TestJob::ok(1));
    let crash = pool.submit(TestJob::panic(2));
    let ok3 = pool.submit(TestJob::ok(3));
    assert_eq!(ok1.await.unwrap().value, 1);
    match crash.await {
        Err(Error::System(SystemError::WorkerCrash(msg))) => {
            assert_eq!(msg, "job 2 panicked")
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(ok3.await.unwrap().value, 3);

    // the crashed worker got replaced
    let handles: Vec<_> = (10..20).map(|i| pool.submit(TestJob::ok(i))).collect();
    for handle in handles {
        handle.await.unwrap();
    }
    let metrics = pool.metrics();
    assert_eq!(metrics.workers_crashed, 1);
    assert!(metrics.workers_spawned >= 3, "{metrics:?}");
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let pool = launch(2, None, ShutdownMode::Wait);
    pool.submit(TestJob::ok(1)).await.unwrap();
    tokio::join!(pool.shutdown(), pool.shutdown());
    pool.shutdown().await;
    pool.initiate_shutdown();
}

#[tokio::test]
async fn submit_after_shutdown_fails() {
    let pool = launch(1, None, ShutdownMode::Wait);
    pool.shutdown().await;
    match pool.submit(TestJob::ok(1)).await {
        Err(Error::System(SystemError::PoolShuttingDown)) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_wait_mode_runs_queued_jobs() {
    let pool = launch(1, None, ShutdownMode::Wait);
    let (gate_job, started, release) = gate(0);
    let running = pool.submit(gate_job);
    started.await.unwrap();
    let queued: Vec<_> = (1..4).map(|i| pool.submit(TestJob::ok(i))).collect();

    pool.initiate_shutdown();
    release.send(()).unwrap();
    pool.shutdown().await;

    assert_eq!(running.await.unwrap().value, 0);
    for (i, handle) in (1..4).zip(queued) {
        assert_eq!(handle.await.unwrap().value, i);
    }
}

#[tokio::test]
async fn shutdown_cancel_mode_rejects_queued_jobs() {
    let pool = launch(1, None, ShutdownMode::Cancel);
    let (gate_job, started, release) = gate(0);
    let running = pool.submit(gate_job);
    started.await.unwrap();
    let queued: Vec<_> = (1..4).map(|i| pool.submit(TestJob::ok(i))).collect();

    pool.initiate_shutdown();
    for handle in queued {
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
    }
    release.send(()).unwrap();
    let err = running.await.unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
    pool.shutdown().await;
    assert_eq!(pool.metrics().jobs_dispatched, 1);
}

#[tokio::test]
async fn dropped_handle_never_runs() {
    let pool = launch(1, None, ShutdownMode::Wait);
    let (gate_job, started, release) = gate(0);
    let running = pool.submit(gate_job);
    started.await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let handle = pool.submit(TestJob::new(1, {
        let ran = Arc::clone(&ran);
        move || {
            ran.store(true, Ordering::SeqCst);
            Ok(1)
        }
    }));
    drop(handle);

    release.send(()).unwrap();
    assert_eq!(running.await.unwrap().value, 0);
    pool.shutdown().await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancelled_handle_never_succeeds() {
    let pool = launch(1, None, ShutdownMode::Wait);
    let (gate_job, started, release) = gate(0);
    let running = pool.submit(gate_job);
    started.await.unwrap();
    let queued = pool.submit(TestJob::ok(1));
    queued.cancel();
    running.cancel();
    release.send(()).unwrap();
    assert!(running.await.unwrap_err().is_cancelled());
    assert!(queued.await.unwrap_err().is_cancelled());
    pool.shutdown().await;
}

#[tokio::test]
async fn dropping_pool_keeps_queued_work_alive() {
    let pool = launch(1, None, ShutdownMode::Wait);
    let (gate_job, started, release) = gate(0);
    let running = pool.submit(gate_job);
    started.await.unwrap();
    let queued = pool.submit(TestJob::ok(1));
    drop(pool);
    release.send(()).unwrap();
    assert_eq!(running.await.unwrap().value, 0);
    assert_eq!(queued.await.unwrap().value, 1);
}
