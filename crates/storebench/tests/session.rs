//! End-to-end runs through the session orchestrator.

use std::time::Duration;
use storebench::config::MIB;
use storebench::platform::Platform;
use storebench::{
    Backend, BenchmarkConfig, Cell, ErrorKind, Operation, RunState, Session, WorkloadShape,
};
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_secs(60);

fn small_config(dir: &TempDir) -> BenchmarkConfig {
    let mut config = BenchmarkConfig::new(dir.path().to_path_buf());
    config.single_file_bytes = 64 * 1024;
    config.file_count = 10;
    config.file_bytes = 1024;
    config
}

fn assert_measured(session: &Session, backend: Backend, shape: WorkloadShape) {
    for operation in [Operation::Write, Operation::Read] {
        let cell = session.results().cell(backend, shape, operation);
        let ms = cell
            .millis()
            .unwrap_or_else(|| panic!("{backend} {shape} {operation}: {cell:?}"));
        assert!(ms >= 0.0);
    }
}

#[tokio::test]
async fn single_large_blob_through_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BenchmarkConfig::new(dir.path().to_path_buf());
    config.single_file_bytes = 100 * MIB;
    config.file_count = 0;

    let mut session = Session::new(config).unwrap();
    session.run_all().await;
    assert_eq!(session.settle(SETTLE * 5).await, 0);

    for backend in Backend::all() {
        assert_measured(&session, backend, WorkloadShape::SingleFile);
    }
}

#[tokio::test]
async fn many_small_blobs_through_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(&dir);
    config.file_count = 100;

    let mut session = Session::new(config).unwrap();
    session.run_all().await;
    assert_eq!(session.settle(SETTLE).await, 0);

    for backend in Backend::all() {
        assert_measured(&session, backend, WorkloadShape::MultipleFiles);
    }
    assert!(session.results().is_complete());
    assert!(session.results().failures().is_empty());
}

#[tokio::test]
async fn missing_sync_capability_only_fails_that_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir);
    let platform = Platform::from_config(&config).with_sync_access_handles(false);

    let mut session = Session::with_platform(config, platform).unwrap();
    session.run_all().await;
    session.settle(SETTLE).await;

    let results = session.results();
    for shape in WorkloadShape::all() {
        for operation in [Operation::Write, Operation::Read] {
            let failure = results
                .cell(Backend::OpfsSync, shape, operation)
                .failure()
                .unwrap();
            assert_eq!(failure.kind, ErrorKind::BackendUnavailable);
        }
        for backend in [Backend::Opfs, Backend::CacheApi, Backend::IndexedDb] {
            assert_measured(&session, backend, shape);
        }
    }
    assert_eq!(results.failures().len(), 4);
}

#[tokio::test]
async fn second_run_is_not_corrupted_by_first_run_replies() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(small_config(&dir)).unwrap();

    session.run_all().await;
    let first = session.run();
    // Nothing was pumped: both worker requests of the first run are still
    // outstanding when the second run starts.
    session.run_all().await;
    assert!(session.run() > first);
    assert_eq!(session.results().run(), session.run());

    assert_eq!(session.settle(SETTLE).await, 0);
    assert_eq!(session.stale_replies(), 2);
    assert!(session.results().is_complete());
    assert!(session.results().failures().is_empty());
}

#[tokio::test]
async fn worker_results_arrive_after_run_all_returns() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(small_config(&dir)).unwrap();

    session.run_all().await;
    assert_eq!(session.state(), RunState::Idle);

    // Main-context backends are complete as soon as run_all returns.
    for shape in WorkloadShape::all() {
        for backend in [Backend::Opfs, Backend::CacheApi, Backend::IndexedDb] {
            assert_measured(&session, backend, shape);
        }
    }

    // The worker catches up later; pump never blocks.
    let deadline = tokio::time::Instant::now() + SETTLE;
    while session.pending() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "worker never reported");
        session.pump().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for shape in WorkloadShape::all() {
        assert_measured(&session, Backend::OpfsSync, shape);
    }
}

#[tokio::test]
async fn each_run_starts_from_an_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir);
    let platform = Platform::from_config(&config).with_sync_access_handles(false);
    let mut session = Session::with_platform(config, platform).unwrap();

    session.run_all().await;
    session.settle(SETTLE).await;
    assert!(!session.results().failures().is_empty());

    // A write-only run clears every earlier cell, failures included.
    session.write_all().await;
    let results = session.results();
    assert!(
        results
            .cell(Backend::Opfs, WorkloadShape::MultipleFiles, Operation::Write)
            .is_pending()
    );
    assert!(
        results
            .cell(Backend::OpfsSync, WorkloadShape::SingleFile, Operation::Write)
            .is_pending()
    );
}

#[tokio::test]
async fn write_then_read_triggers_fill_the_single_file_column() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(small_config(&dir)).unwrap();

    session.write_all().await;
    let run = session.run();
    assert!(
        session
            .results()
            .cell(Backend::CacheApi, WorkloadShape::SingleFile, Operation::Read)
            .is_pending()
    );

    session.read_all().await;
    assert_eq!(session.run(), run);
    assert_eq!(session.settle(SETTLE).await, 0);

    for backend in Backend::all() {
        assert_measured(&session, backend, WorkloadShape::SingleFile);
        assert!(session.results().get(backend).unwrap().multiple_files.is_none());
    }
}

#[tokio::test]
async fn read_without_any_write_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(small_config(&dir)).unwrap();

    session.read_all().await;
    session.settle(SETTLE).await;

    for backend in Backend::all() {
        let cell = session
            .results()
            .cell(backend, WorkloadShape::SingleFile, Operation::Read);
        assert_eq!(
            cell.failure().map(|f| f.kind),
            Some(ErrorKind::NotFound),
            "{backend}: {cell:?}"
        );
    }
}

#[tokio::test]
async fn unanswered_worker_requests_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(&dir);
    config.single_file_bytes = 1024;
    config.file_count = 2;
    let platform = Platform::from_config(&config).with_open_latency(Duration::from_millis(250));
    let mut session = Session::with_platform(config, platform).unwrap();

    session.run_all().await;
    // The worker needs at least a second for the multi-file request alone.
    let unanswered = session.settle(Duration::ZERO).await;
    assert!(unanswered >= 1);
    assert_eq!(session.pending(), 0);

    let cell = session
        .results()
        .cell(Backend::OpfsSync, WorkloadShape::MultipleFiles, Operation::Read);
    assert_eq!(cell.failure().map(|f| f.kind), Some(ErrorKind::Timeout));
    assert!(!matches!(
        session
            .results()
            .cell(Backend::Opfs, WorkloadShape::MultipleFiles, Operation::Read),
        Cell::Failed(_)
    ));

    // The abandoned worker measurement must not hold up shutdown.
    let started = std::time::Instant::now();
    session.shutdown();
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(1), "shutdown took {elapsed:?}");
}
