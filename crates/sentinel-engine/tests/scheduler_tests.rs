//! Task scheduler tests: ordering, cancellation, idle release and shutdown

mod mock_model;

use mock_model::{cpu_config, engine, MockLoader};
use sentinel_core::{Document, Error, ScoringConfig};
use sentinel_engine::{TaskHandle, TaskScheduler, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

fn one_at_a_time() -> ScoringConfig {
    ScoringConfig {
        batch_size_initial: 1,
        batch_size_min: 1,
        batch_size_max: 1,
        ..cpu_config()
    }
}

async fn wait_until_running(handle: &TaskHandle, batches: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let TaskStatus::Running(progress) = handle.poll() {
                if progress.batches_done >= batches {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("task never started running");
}

#[tokio::test]
async fn test_submit_completes_with_report() {
    let loader = Arc::new(MockLoader::new().with_default(0.25));
    let scheduler = TaskScheduler::new(engine(&loader, cpu_config()));

    let handle = scheduler.submit(Document::from_paragraphs(["first", "", "third"]));
    let status = handle.wait().await;

    match status {
        TaskStatus::Done(report) => {
            assert_eq!(report.records.len(), 2);
            assert_eq!(report.paragraph_count, 3);
            assert_eq!(report.probability, 0.25);
        }
        other => panic!("expected Done, got {:?}", other),
    }
    assert!(matches!(handle.poll(), TaskStatus::Done(_)));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_submissions_run_in_order() {
    let loader = Arc::new(MockLoader::new().with_latency(Duration::from_millis(10)));
    let scheduler = TaskScheduler::new(engine(&loader, cpu_config()));

    let handles: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|text| scheduler.submit(Document::from_paragraphs([text])))
        .collect();
    assert!(handles.windows(2).all(|pair| pair[0].id() < pair[1].id()));

    for handle in &handles {
        assert!(matches!(handle.wait().await, TaskStatus::Done(_)));
    }
    assert_eq!(loader.state().inputs(), vec!["first", "second", "third"]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_task_is_immediate() {
    let loader = Arc::new(MockLoader::new().with_latency(Duration::from_millis(20)));
    let scheduler = TaskScheduler::new(engine(&loader, one_at_a_time()));

    let running = scheduler.submit(Document::from_paragraphs(["a", "b", "c"]));
    let queued = scheduler.submit(Document::from_paragraphs(["queued text"]));

    queued.cancel();
    assert!(matches!(queued.poll(), TaskStatus::Cancelled));

    assert!(matches!(running.wait().await, TaskStatus::Done(_)));
    assert!(matches!(queued.wait().await, TaskStatus::Cancelled));
    assert!(!loader.state().inputs().contains(&"queued text".to_string()));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_task_then_resubmit() {
    let loader = Arc::new(MockLoader::new().with_latency(Duration::from_millis(15)));
    let scheduler = TaskScheduler::new(engine(&loader, one_at_a_time()));
    let document = Document::from_paragraphs((0..10).map(|i| format!("paragraph {}", i)));

    let handle = scheduler.submit(document.clone());
    wait_until_running(&handle, 1).await;
    handle.cancel();

    assert!(matches!(handle.wait().await, TaskStatus::Cancelled));
    assert!(loader.state().calls() < 10);

    let retry = scheduler.submit(document);
    match retry.wait().await {
        TaskStatus::Done(report) => {
            assert_eq!(report.records.len(), 10);
            assert_eq!(report.batch_count, 10);
        }
        other => panic!("expected Done, got {:?}", other),
    }
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_progress_visible_while_running() {
    let loader = Arc::new(MockLoader::new().with_latency(Duration::from_millis(15)));
    let scheduler = TaskScheduler::new(engine(&loader, one_at_a_time()));

    let handle = scheduler.submit(Document::from_paragraphs(["a", "b", "c", "d"]));
    wait_until_running(&handle, 1).await;

    if let TaskStatus::Running(progress) = handle.poll() {
        assert_eq!(progress.windows_total, 4);
        assert!(progress.fraction() > 0.0 && progress.fraction() <= 1.0);
    }
    assert!(matches!(handle.wait().await, TaskStatus::Done(_)));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_docx_fails_before_inference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.docx");
    std::fs::write(&path, b"PK\x03\x04 this is not a zip archive").unwrap();

    let loader = Arc::new(MockLoader::new());
    let scheduler = TaskScheduler::new(engine(&loader, cpu_config()));

    match scheduler.submit_path(&path).wait().await {
        TaskStatus::Failed(error) => {
            assert!(matches!(error.as_ref(), Error::CorruptFile { .. }))
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(loader.load_count(), 0);
    assert_eq!(loader.state().calls(), 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_submit_path_loads_on_worker() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("essay.txt");
    std::fs::write(&path, "Opening line.\n\nClosing line.\n").unwrap();

    let loader = Arc::new(MockLoader::new());
    let scheduler = TaskScheduler::new(engine(&loader, cpu_config()));

    match scheduler.submit_path(&path).wait().await {
        TaskStatus::Done(report) => {
            assert_eq!(report.paragraph_count, 3);
            let indices: Vec<_> = report.records.iter().map(|r| r.paragraph_index).collect();
            assert_eq!(indices, vec![0, 2]);
        }
        other => panic!("expected Done, got {:?}", other),
    }
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_idle_runtime_is_released() {
    let loader = Arc::new(MockLoader::new());
    let engine = engine(&loader, cpu_config());
    let runtime = Arc::clone(engine.runtime());
    let scheduler = TaskScheduler::with_idle_unload(engine, Some(Duration::from_millis(50)));

    let handle = scheduler.submit(Document::from_paragraphs(["some text"]));
    assert!(matches!(handle.wait().await, TaskStatus::Done(_)));
    assert!(runtime.is_loaded());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!runtime.is_loaded());

    let handle = scheduler.submit(Document::from_paragraphs(["more text"]));
    assert!(matches!(handle.wait().await, TaskStatus::Done(_)));
    assert_eq!(loader.load_count(), 2);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_and_releases() {
    let loader = Arc::new(MockLoader::new().with_latency(Duration::from_millis(10)));
    let engine = engine(&loader, cpu_config());
    let runtime = Arc::clone(engine.runtime());
    let scheduler = TaskScheduler::new(engine);

    let handle = scheduler.submit(Document::from_paragraphs(["queued before shutdown"]));
    scheduler.shutdown().await;

    assert!(matches!(handle.poll(), TaskStatus::Done(_)));
    assert!(!runtime.is_loaded());

    let late = scheduler.submit(Document::from_paragraphs(["too late"]));
    assert!(matches!(late.poll(), TaskStatus::Failed(_)));
}

#[test]
fn test_wait_fails_when_worker_is_gone() {
    let loader = Arc::new(MockLoader::new());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (scheduler, handle) = runtime.block_on(async {
        let scheduler = TaskScheduler::new(engine(&loader, cpu_config()));
        let handle = scheduler.submit(Document::from_paragraphs(["never scored"]));
        (scheduler, handle)
    });
    // Dropping the runtime aborts the worker with the job still queued.
    drop(runtime);

    let waiter = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let status = waiter.block_on(async {
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("wait never returned")
    });

    assert!(matches!(status, TaskStatus::Failed(_)));
    assert_eq!(loader.state().calls(), 0);
    handle.cancel();
    drop(scheduler);
}
