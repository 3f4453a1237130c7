//! Cross-context coordinator.
//!
//! The sync-handle backend may only run on the isolated worker context. The
//! [`Coordinator`] owns that context: one dedicated thread, fed requests
//! over a crossbeam channel and answering on a tokio channel so the main
//! context can await replies without blocking. The worker handles one
//! request at a time and answers every request exactly once, errors
//! included.
//!
//! Each request carries a [`RequestId`]. Replies are matched against the
//! pending map; a reply whose request was forgotten (because a newer run
//! started) is counted as stale and dropped.
//!
//! The worker also sees the oldest live run and a stop flag. Requests of a
//! superseded run are answered with `Cancelled` instead of being measured,
//! and a running measurement stops at the next item boundary.

mod protocol;

pub use protocol::{
    CommandKind, RequestId, RequestIdGenerator, WorkerCommand, WorkerError, WorkerReply,
    WorkerRequest,
};

use crate::bench::{BackendOptions, OpfsSyncBackend};
use crate::config::{Backend, Operation, WorkloadShape};
use crate::error::{BenchError, ErrorKind, Result};
use crate::platform::{self, Platform};
use crate::results::{Cell, Failure, RunId, TestOutcome};
use crate::workload::Workload;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, trace, warn};

/// Bookkeeping for a request that has not been answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDispatch {
    pub run: RunId,
    pub shape: WorkloadShape,
    pub kind: CommandKind,
}

/// A reply matched to the request it answers.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub dispatch: PendingDispatch,
    pub reply: WorkerReply,
}

impl Delivery {
    /// Convert the reply into a table update for the sync backend.
    ///
    /// A failed write of a round trip also fails its read.
    pub fn outcome(&self) -> TestOutcome {
        let mut outcome = TestOutcome::new(Backend::OpfsSync, self.reply.shape);
        if let Some(timing) = &self.reply.write_time {
            outcome.write_time = Cell::from_timing(timing);
        }
        if let Some(timing) = &self.reply.read_time {
            outcome.read_time = Cell::from_timing(timing);
        }
        if let Some(error) = &self.reply.error {
            let failed = Cell::Failed(error.failure.clone());
            match error.operation {
                Operation::Write if self.dispatch.kind == CommandKind::RoundTrip => {
                    outcome.write_time = failed.clone();
                    outcome.read_time = failed;
                }
                Operation::Write => outcome.write_time = failed,
                Operation::Read => outcome.read_time = failed,
            }
        }
        outcome
    }
}

/// Cancellation state shared between the coordinator and its worker.
#[derive(Debug, Default)]
struct Cancellation {
    /// Requests of runs below this generation are superseded.
    floor: AtomicU64,
    stopping: AtomicBool,
}

impl Cancellation {
    fn supersede_before(&self, run: RunId) {
        self.floor.fetch_max(run.0, Ordering::AcqRel);
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn cancels(&self, run: RunId) -> bool {
        self.is_stopping() || run.0 < self.floor.load(Ordering::Acquire)
    }
}

/// Owner of the isolated worker context.
pub struct Coordinator {
    requests: Option<Sender<WorkerRequest>>,
    cancel: Arc<Cancellation>,
    replies: UnboundedReceiver<WorkerReply>,
    ids: RequestIdGenerator,
    pending: HashMap<RequestId, PendingDispatch>,
    stale_replies: u64,
    handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Start the worker thread.
    pub fn spawn(platform: &Platform, options: BackendOptions) -> Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let backend = OpfsSyncBackend::new(platform, options);
        let cancel = Arc::new(Cancellation::default());
        let worker_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("opfs-sync-worker".to_string())
            .spawn(move || worker_main(&backend, &request_rx, &reply_tx, &worker_cancel))?;

        debug!("worker context spawned");

        Ok(Self {
            requests: Some(request_tx),
            cancel,
            replies: reply_rx,
            ids: RequestIdGenerator::new(),
            pending: HashMap::new(),
            stale_replies: 0,
            handle: Some(handle),
        })
    }

    /// Queue `command` for `run` without waiting for it.
    pub fn post(&mut self, run: RunId, command: WorkerCommand) -> Result<RequestId> {
        let sender = self.requests.as_ref().ok_or(BenchError::WorkerGone)?;
        let id = self.ids.next();
        let dispatch = PendingDispatch {
            run,
            shape: command.shape(),
            kind: command.kind(),
        };

        sender
            .send(WorkerRequest { id, run, command })
            .map_err(|_| BenchError::WorkerGone)?;
        self.pending.insert(id, dispatch);

        debug!(%id, %run, shape = %dispatch.shape, kind = ?dispatch.kind, "dispatched to worker");
        Ok(id)
    }

    /// Queue a write-then-read of `workload` for `run`.
    pub fn post_workload(&mut self, run: RunId, workload: &Workload) -> Result<RequestId> {
        self.post(run, WorkerCommand::RoundTrip(workload.clone()))
    }

    /// Drop every pending request of runs older than `run`; their replies
    /// will be discarded as stale. The worker skips the ones it has not
    /// finished yet.
    pub fn forget_runs_before(&mut self, run: RunId) {
        self.cancel.supersede_before(run);
        let before = self.pending.len();
        self.pending.retain(|_, dispatch| dispatch.run >= run);
        let forgotten = before - self.pending.len();
        if forgotten > 0 {
            debug!(forgotten, %run, "superseded worker requests forgotten");
        }
    }

    /// Number of unanswered requests of `run`.
    pub fn pending_for(&self, run: RunId) -> usize {
        self.pending.values().filter(|d| d.run == run).count()
    }

    /// Remove and return every unanswered request of `run`.
    pub fn take_pending(&mut self, run: RunId) -> Vec<(RequestId, PendingDispatch)> {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, d)| d.run == run)
            .map(|(id, _)| *id)
            .collect();
        let mut taken: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|d| (id, d)))
            .collect();
        taken.sort_by_key(|(id, _)| *id);
        taken
    }

    /// Replies received for requests nobody is waiting on anymore.
    pub fn stale_replies(&self) -> u64 {
        self.stale_replies
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Next reply already received, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Delivery>> {
        loop {
            match self.replies.try_recv() {
                Ok(reply) => {
                    if let Some(delivery) = self.resolve(reply) {
                        return Ok(Some(delivery));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(BenchError::WorkerGone),
            }
        }
    }

    /// Wait up to `timeout` for the next reply of a pending request.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Delivery> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reply = match tokio::time::timeout_at(deadline, self.replies.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Err(BenchError::WorkerGone),
                Err(_) => {
                    return Err(BenchError::Timeout {
                        backend: Backend::OpfsSync,
                        after: timeout,
                    });
                }
            };
            if let Some(delivery) = self.resolve(reply) {
                return Ok(delivery);
            }
        }
    }

    fn resolve(&mut self, reply: WorkerReply) -> Option<Delivery> {
        match self.pending.remove(&reply.id) {
            Some(dispatch) => {
                trace!(id = %reply.id, run = %dispatch.run, "worker reply matched");
                Some(Delivery { dispatch, reply })
            }
            None => {
                self.stale_replies += 1;
                debug!(id = %reply.id, "discarding reply of a superseded run");
                None
            }
        }
    }

    /// Stop accepting requests and join the worker thread.
    ///
    /// Queued requests are dropped unanswered; a measurement in progress
    /// stops at its next item.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.cancel.stop();
        self.requests.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("worker thread panicked");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker thread main loop.
fn worker_main(
    backend: &OpfsSyncBackend,
    requests: &Receiver<WorkerRequest>,
    replies: &UnboundedSender<WorkerReply>,
    cancel: &Cancellation,
) {
    platform::enter_worker_context();
    debug!("worker context started");

    for request in requests {
        if cancel.is_stopping() {
            debug!("worker stopping, queued requests dropped");
            break;
        }
        trace!(id = %request.id, kind = ?request.command.kind(), "worker processing request");

        let cancelled = || cancel.cancels(request.run);
        let reply = panic::catch_unwind(AssertUnwindSafe(|| {
            handle_request(backend, &request, &cancelled)
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(id = %request.id, %message, "worker request panicked");
            let operation = match request.command.kind() {
                CommandKind::Read => Operation::Read,
                CommandKind::RoundTrip | CommandKind::Write => Operation::Write,
            };
            let mut reply = WorkerReply::new(request.id, request.command.shape());
            reply.error = Some(WorkerError {
                operation,
                failure: Failure::new(
                    ErrorKind::TransferFailure,
                    format!("worker panicked: {message}"),
                ),
            });
            reply
        });

        if replies.send(reply).is_err() {
            debug!("reply channel closed, worker exiting");
            break;
        }
    }

    debug!("worker context exiting");
}

fn handle_request(
    backend: &OpfsSyncBackend,
    request: &WorkerRequest,
    cancelled: &dyn Fn() -> bool,
) -> WorkerReply {
    let mut reply = WorkerReply::new(request.id, request.command.shape());
    let failed = |operation: Operation, err: &BenchError| {
        if err.kind() == ErrorKind::Cancelled {
            debug!(id = %request.id, run = %request.run, %operation, "sync measurement cancelled");
        } else {
            warn!(id = %request.id, %operation, error = %err, "sync backend failed");
        }
        WorkerError {
            operation,
            failure: Failure::from(err),
        }
    };

    match &request.command {
        WorkerCommand::RoundTrip(workload) => match backend.write_cancellable(workload, cancelled) {
            Ok(timing) => {
                reply.write_time = Some(timing);
                match backend.read_cancellable(workload, cancelled) {
                    Ok(timing) => reply.read_time = Some(timing),
                    Err(err) => reply.error = Some(failed(Operation::Read, &err)),
                }
            }
            Err(err) => reply.error = Some(failed(Operation::Write, &err)),
        },
        WorkerCommand::Write(workload) => match backend.write_cancellable(workload, cancelled) {
            Ok(timing) => reply.write_time = Some(timing),
            Err(err) => reply.error = Some(failed(Operation::Write, &err)),
        },
        WorkerCommand::Read(workload) => match backend.read_cancellable(workload, cancelled) {
            Ok(timing) => reply.read_time = Some(timing),
            Err(err) => reply.error = Some(failed(Operation::Read, &err)),
        },
    }

    reply
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    fn options() -> BackendOptions {
        BackendOptions {
            op_timeout: WAIT,
            verify: true,
        }
    }

    #[tokio::test]
    async fn round_trip_reply_carries_both_timings() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::spawn(&Platform::new(dir.path()), options()).unwrap();

        let id = coordinator
            .post_workload(RunId(1), &Workload::many(4, 256))
            .unwrap();
        assert_eq!(coordinator.pending_for(RunId(1)), 1);

        let delivery = coordinator.recv(WAIT).await.unwrap();
        assert_eq!(delivery.reply.id, id);
        assert_eq!(delivery.dispatch.run, RunId(1));
        assert_eq!(delivery.reply.write_time.as_ref().unwrap().len(), 4);
        assert_eq!(delivery.reply.read_time.as_ref().unwrap().len(), 4);
        assert!(delivery.reply.error.is_none());
        assert_eq!(coordinator.pending_for(RunId(1)), 0);

        let outcome = delivery.outcome();
        assert!(outcome.write_time.millis().is_some());
        assert!(outcome.read_time.millis().is_some());
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn unsupported_platform_replies_with_error_and_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::new(dir.path()).with_sync_access_handles(false);
        let mut coordinator = Coordinator::spawn(&platform, options()).unwrap();

        coordinator
            .post_workload(RunId(1), &Workload::single(64))
            .unwrap();
        let delivery = coordinator.recv(WAIT).await.unwrap();
        let error = delivery.reply.error.clone().unwrap();
        assert_eq!(error.operation, Operation::Write);
        assert_eq!(error.failure.kind, ErrorKind::BackendUnavailable);

        let outcome = delivery.outcome();
        assert!(matches!(outcome.write_time, Cell::Failed(_)));
        assert!(matches!(outcome.read_time, Cell::Failed(_)));

        coordinator
            .post_workload(RunId(1), &Workload::single(64))
            .unwrap();
        assert!(coordinator.recv(WAIT).await.is_ok());
        assert!(coordinator.is_running());
    }

    #[tokio::test]
    async fn read_of_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::spawn(&Platform::new(dir.path()), options()).unwrap();

        coordinator
            .post(RunId(1), WorkerCommand::Read(Workload::single(16)))
            .unwrap();
        let delivery = coordinator.recv(WAIT).await.unwrap();
        let error = delivery.reply.error.clone().unwrap();
        assert_eq!(error.operation, Operation::Read);
        assert_eq!(error.failure.kind, ErrorKind::NotFound);

        let outcome = delivery.outcome();
        assert!(outcome.write_time.is_pending());
        assert!(matches!(outcome.read_time, Cell::Failed(_)));
    }

    #[tokio::test]
    async fn forgotten_requests_become_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::spawn(&Platform::new(dir.path()), options()).unwrap();

        coordinator
            .post_workload(RunId(1), &Workload::single(32))
            .unwrap();
        coordinator.forget_runs_before(RunId(2));
        let current = coordinator
            .post_workload(RunId(2), &Workload::single(32))
            .unwrap();

        let delivery = coordinator.recv(WAIT).await.unwrap();
        assert_eq!(delivery.reply.id, current);
        assert_eq!(coordinator.stale_replies(), 1);
    }

    #[test]
    fn shutdown_does_not_drain_superseded_work() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::new(dir.path()).with_open_latency(Duration::from_millis(200));
        let mut coordinator = Coordinator::spawn(&platform, options()).unwrap();

        // Each request alone needs about two seconds of opens.
        for run in 1..=3 {
            coordinator
                .post_workload(RunId(run), &Workload::many(5, 16))
                .unwrap();
        }
        coordinator.forget_runs_before(RunId(10));

        let started = std::time::Instant::now();
        coordinator.shutdown();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(1), "shutdown took {elapsed:?}");
    }

    #[test]
    fn shutdown_interrupts_live_work_at_an_item_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::new(dir.path()).with_open_latency(Duration::from_millis(200));
        let mut coordinator = Coordinator::spawn(&platform, options()).unwrap();

        coordinator
            .post_workload(RunId(1), &Workload::many(10, 16))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        coordinator.shutdown();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(1), "shutdown took {elapsed:?}");
    }

    #[tokio::test]
    async fn superseded_requests_are_answered_without_measuring() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Platform::new(dir.path()).with_open_latency(Duration::from_millis(200));
        let mut coordinator = Coordinator::spawn(&platform, options()).unwrap();

        coordinator
            .post_workload(RunId(1), &Workload::many(5, 16))
            .unwrap();
        coordinator
            .post_workload(RunId(1), &Workload::many(5, 16))
            .unwrap();
        coordinator.forget_runs_before(RunId(2));
        let current = coordinator
            .post(RunId(2), WorkerCommand::Write(Workload::single(16)))
            .unwrap();

        let started = tokio::time::Instant::now();
        let delivery = coordinator.recv(WAIT).await.unwrap();
        assert_eq!(delivery.reply.id, current);
        assert!(delivery.reply.write_time.is_some());
        assert_eq!(coordinator.stale_replies(), 2);
        // One in-flight item plus the current write, never the full four
        // seconds of the superseded round trips.
        assert!(started.elapsed() < Duration::from_millis(1500));
        // Neither superseded round trip reached its last item.
        assert!(!dir.path().join("opfs").join("opfsSyncTestFile_4").exists());
    }

    #[tokio::test]
    async fn recv_times_out_without_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::spawn(&Platform::new(dir.path()), options()).unwrap();

        assert!(coordinator.try_recv().unwrap().is_none());
        let err = coordinator
            .recv(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::Timeout {
                backend: Backend::OpfsSync,
                ..
            }
        ));
    }

    #[test]
    fn take_pending_only_removes_the_given_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = Coordinator::spawn(&Platform::new(dir.path()), options()).unwrap();
        coordinator
            .post(RunId(1), WorkerCommand::Write(Workload::single(8)))
            .unwrap();
        coordinator
            .post(RunId(2), WorkerCommand::Write(Workload::single(8)))
            .unwrap();

        let taken = coordinator.take_pending(RunId(2));
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].1.run, RunId(2));
        assert_eq!(coordinator.pending_for(RunId(1)), 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
