//! Run orchestration.
//!
//! A [`Session`] owns the main-context backends, the worker coordinator and
//! the results table. Main-context backends are awaited in order; the sync
//! backend is dispatched to the worker and lands in the table later, through
//! [`Session::pump`] or [`Session::settle`].

use crate::bench::{BackendOptions, OpTiming, StorageBackend, main_context_backends};
use crate::config::{Backend, BenchmarkConfig, Operation, WorkloadShape};
use crate::error::{BenchError, ErrorKind, Result};
use crate::platform::Platform;
use crate::results::{Cell, Failure, ResultsTable, RunId, TestOutcome};
use crate::worker::{CommandKind, Coordinator, Delivery, PendingDispatch, WorkerCommand};
use crate::workload::Workload;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

/// What the session is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(WorkloadShape),
}

/// Benchmark session: backends, worker and results of the current run.
pub struct Session {
    config: BenchmarkConfig,
    backends: Vec<Box<dyn StorageBackend>>,
    coordinator: Coordinator,
    results: ResultsTable,
    run: RunId,
    state: RunState,
    written: Option<Workload>,
}

impl Session {
    /// Create a session on the platform described by `config`.
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        let platform = Platform::from_config(&config);
        Self::with_platform(config, platform)
    }

    /// Create a session on an explicit platform.
    pub fn with_platform(config: BenchmarkConfig, platform: Platform) -> Result<Self> {
        let options = BackendOptions::from_config(&config);
        let backends = main_context_backends(&platform, options);
        let coordinator = Coordinator::spawn(&platform, options)?;

        Ok(Self {
            config,
            backends,
            coordinator,
            results: ResultsTable::new(),
            run: RunId::default(),
            state: RunState::Idle,
            written: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// Current run generation; zero before the first run.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Worker requests of the current run still awaiting a reply.
    pub fn pending(&self) -> usize {
        self.coordinator.pending_for(self.run)
    }

    /// Worker replies discarded because their run was superseded.
    pub fn stale_replies(&self) -> u64 {
        self.coordinator.stale_replies()
    }

    /// Run every backend on both workload shapes.
    ///
    /// Main-context backends are awaited write-then-read; a failing backend
    /// is recorded and the run continues. The sync backend is dispatched to
    /// the worker per shape without waiting, so its cells stay pending until
    /// [`pump`](Self::pump) or [`settle`](Self::settle) merges the replies.
    pub async fn run_all(&mut self) -> &ResultsTable {
        let run = self.begin_run();

        for shape in WorkloadShape::all() {
            self.state = RunState::Running(shape);
            let workload = Workload::for_shape(shape, &self.config);
            info!(
                %run,
                %shape,
                items = workload.len(),
                bytes = workload.total_bytes(),
                "measuring"
            );

            for backend in &self.backends {
                let outcome = round_trip(backend.as_ref(), &workload).await;
                self.results.merge(outcome);
            }

            self.dispatch(run, WorkerCommand::RoundTrip(workload));
        }

        self.state = RunState::Idle;
        &self.results
    }

    /// Write the single-file workload through every backend.
    ///
    /// Starts a new run; the workload is kept for [`read_all`](Self::read_all).
    pub async fn write_all(&mut self) -> &ResultsTable {
        let run = self.begin_run();
        let shape = WorkloadShape::SingleFile;
        self.state = RunState::Running(shape);
        let workload = Workload::for_shape(shape, &self.config);

        for backend in &self.backends {
            let result = measure(backend.as_ref(), Operation::Write, &workload).await;
            let cell = Cell::from_result(&result);
            self.results.merge(TestOutcome::new(backend.id(), shape).with_write(cell));
        }

        self.dispatch(run, WorkerCommand::Write(workload.clone()));
        self.written = Some(workload);
        self.state = RunState::Idle;
        &self.results
    }

    /// Read back what [`write_all`](Self::write_all) wrote, within the same
    /// run.
    ///
    /// Without a previous write the single-file workload is regenerated and
    /// read from whatever the keys hold.
    pub async fn read_all(&mut self) -> &ResultsTable {
        if self.run == RunId::default() {
            self.begin_run();
        }
        let run = self.run;
        let workload = match &self.written {
            Some(workload) => workload.clone(),
            None => Workload::for_shape(WorkloadShape::SingleFile, &self.config),
        };
        let shape = workload.shape();
        self.state = RunState::Running(shape);

        for backend in &self.backends {
            let result = measure(backend.as_ref(), Operation::Read, &workload).await;
            let cell = Cell::from_result(&result);
            self.results.merge(TestOutcome::new(backend.id(), shape).with_read(cell));
        }

        self.dispatch(run, WorkerCommand::Read(workload));
        self.state = RunState::Idle;
        &self.results
    }

    /// Merge every worker reply already received. Never blocks.
    ///
    /// Returns the number of replies merged.
    pub fn pump(&mut self) -> Result<usize> {
        let mut merged = 0;
        while let Some(delivery) = self.coordinator.try_recv()? {
            if self.apply(&delivery) {
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Wait until no worker request of the current run is pending.
    ///
    /// Requests still unanswered after `timeout` are recorded as `Timeout`
    /// failures (or `WorkerGone` if the worker died). Returns how many were
    /// recorded that way.
    pub async fn settle(&mut self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut failure = Failure::new(
            ErrorKind::Timeout,
            format!("{}: no reply within {timeout:?}", Backend::OpfsSync),
        );

        while self.pending() > 0 {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.coordinator.recv(remaining).await {
                Ok(delivery) => {
                    self.apply(&delivery);
                }
                Err(BenchError::Timeout { .. }) => break,
                Err(err) => {
                    failure = Failure::from(&err);
                    break;
                }
            }
        }

        let leftover = self.coordinator.take_pending(self.run);
        for (id, dispatch) in &leftover {
            warn!(%id, shape = %dispatch.shape, kind = %failure.kind, "worker request unanswered");
            self.results.merge(unanswered(dispatch, failure.clone()));
        }
        leftover.len()
    }

    /// Stop the worker context.
    pub fn shutdown(self) {
        self.coordinator.shutdown();
    }

    fn begin_run(&mut self) -> RunId {
        self.run = self.run.next();
        self.coordinator.forget_runs_before(self.run);
        self.results.reset(self.run);
        self.written = None;
        debug!(run = %self.run, "run started");
        self.run
    }

    fn dispatch(&mut self, run: RunId, command: WorkerCommand) {
        let shape = command.shape();
        let kind = command.kind();
        if let Err(err) = self.coordinator.post(run, command) {
            warn!(%shape, error = %err, "could not dispatch to worker");
            let dispatch = PendingDispatch { run, shape, kind };
            self.results.merge(unanswered(&dispatch, Failure::from(&err)));
        }
    }

    fn apply(&mut self, delivery: &Delivery) -> bool {
        if delivery.dispatch.run != self.run {
            debug!(run = %delivery.dispatch.run, "ignoring reply of an earlier run");
            return false;
        }
        let outcome = delivery.outcome();
        log_outcome(&outcome);
        self.results.merge(outcome);
        true
    }
}

/// Write then read one backend. A failed write fails the read too.
async fn round_trip(backend: &dyn StorageBackend, workload: &Workload) -> TestOutcome {
    let shape = workload.shape();
    match measure(backend, Operation::Write, workload).await {
        Ok(write) => {
            let read = measure(backend, Operation::Read, workload).await;
            TestOutcome::new(backend.id(), shape)
                .with_write(Cell::from_timing(&write))
                .with_read(Cell::from_result(&read))
        }
        Err(err) => TestOutcome::failed(backend.id(), shape, Failure::from(&err)),
    }
}

async fn measure(
    backend: &dyn StorageBackend,
    operation: Operation,
    workload: &Workload,
) -> Result<OpTiming> {
    let id = backend.id();
    let shape = workload.shape();
    let span = info_span!("measure", backend = %id, %shape, %operation);

    let result = async {
        match operation {
            Operation::Write => backend.write(workload).await,
            Operation::Read => backend.read(workload).await,
        }
    }
    .instrument(span)
    .await;

    match &result {
        Ok(timing) => match timing.mean_ms() {
            Some(mean) => info!(backend = %id, %shape, %operation, mean_ms = mean, "measured"),
            None => info!(backend = %id, %shape, %operation, "no data"),
        },
        Err(err) => warn!(
            backend = %id,
            %shape,
            %operation,
            kind = %err.kind(),
            error = %err,
            "failed"
        ),
    }
    result
}

fn log_outcome(outcome: &TestOutcome) {
    for (operation, cell) in [
        (Operation::Write, &outcome.write_time),
        (Operation::Read, &outcome.read_time),
    ] {
        match cell {
            Cell::Millis(mean) => {
                info!(
                    backend = %outcome.backend,
                    shape = %outcome.shape,
                    %operation,
                    mean_ms = mean,
                    "measured"
                );
            }
            Cell::Failed(failure) => {
                warn!(
                    backend = %outcome.backend,
                    shape = %outcome.shape,
                    %operation,
                    kind = %failure.kind,
                    error = %failure.message,
                    "failed"
                );
            }
            Cell::NoData | Cell::Pending => {}
        }
    }
}

/// Table update for a worker request that never answered.
fn unanswered(dispatch: &PendingDispatch, failure: Failure) -> TestOutcome {
    let outcome = TestOutcome::new(Backend::OpfsSync, dispatch.shape);
    match dispatch.kind {
        CommandKind::RoundTrip => TestOutcome::failed(Backend::OpfsSync, dispatch.shape, failure),
        CommandKind::Write => outcome.with_write(Cell::Failed(failure)),
        CommandKind::Read => outcome.with_read(Cell::Failed(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;

    /// Reports a known duration per item: `step * (index + 1)`.
    struct FixedSamples {
        write_step: Duration,
        read_step: Duration,
    }

    impl FixedSamples {
        fn timing(step: Duration, workload: &Workload) -> OpTiming {
            (1..=workload.len())
                .map(|n| step * u32::try_from(n).unwrap())
                .fold(OpTiming::default(), |mut timing, sample| {
                    timing.push(sample);
                    timing
                })
        }
    }

    impl StorageBackend for FixedSamples {
        fn id(&self) -> Backend {
            Backend::Opfs
        }

        fn write<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
            async move { Ok(Self::timing(self.write_step, workload)) }.boxed()
        }

        fn read<'a>(&'a self, workload: &'a Workload) -> BoxFuture<'a, Result<OpTiming>> {
            async move { Ok(Self::timing(self.read_step, workload)) }.boxed()
        }
    }

    #[tokio::test]
    async fn multi_item_cell_is_the_mean_of_its_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchmarkConfig::new(dir.path().to_path_buf());
        config.single_file_bytes = 16;
        config.file_count = 4;
        config.file_bytes = 8;
        let platform = Platform::new(dir.path());
        let mut session = Session::with_platform(config, platform).unwrap();
        let fixed = FixedSamples {
            write_step: Duration::from_micros(500),
            read_step: Duration::from_micros(250),
        };
        let workload = Workload::many(4, 8);
        let write = FixedSamples::timing(fixed.write_step, &workload);
        let read = FixedSamples::timing(fixed.read_step, &workload);
        session.backends = vec![Box::new(fixed)];

        session.run_all().await;

        let results = session.results();
        let shape = WorkloadShape::MultipleFiles;
        assert_eq!(write.len(), 4);
        assert_eq!(
            results.cell(Backend::Opfs, shape, Operation::Write),
            &Cell::Millis(write.mean_ms().unwrap())
        );
        assert_eq!(
            results.cell(Backend::Opfs, shape, Operation::Read),
            &Cell::Millis(read.mean_ms().unwrap())
        );
        assert!((write.mean_ms().unwrap() - 1.25).abs() < 1e-9);
        assert!((read.mean_ms().unwrap() - 0.625).abs() < 1e-9);
    }

    #[test]
    fn unanswered_round_trip_fails_both_cells() {
        let dispatch = PendingDispatch {
            run: RunId(1),
            shape: WorkloadShape::MultipleFiles,
            kind: CommandKind::RoundTrip,
        };
        let outcome = unanswered(&dispatch, Failure::new(ErrorKind::Timeout, "late"));
        assert!(matches!(outcome.write_time, Cell::Failed(_)));
        assert!(matches!(outcome.read_time, Cell::Failed(_)));
    }

    #[test]
    fn unanswered_read_leaves_write_alone() {
        let dispatch = PendingDispatch {
            run: RunId(1),
            shape: WorkloadShape::SingleFile,
            kind: CommandKind::Read,
        };
        let outcome = unanswered(&dispatch, Failure::new(ErrorKind::WorkerGone, "gone"));
        assert!(outcome.write_time.is_pending());
        assert!(matches!(outcome.read_time, Cell::Failed(_)));
    }
}
