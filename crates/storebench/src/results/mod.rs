//! Result aggregation and reporting.
//!
//! The [`ResultsTable`] is the single source of truth for what the user
//! sees: one row per backend, one column pair per workload shape. Every
//! backend result (awaited on the main context or delivered later by the
//! worker) enters the table through [`ResultsTable::merge`].

pub mod format;
pub mod printer;

pub use format::{format_bytes, format_cell, format_millis};
pub use printer::ResultsPrinter;

use crate::bench::OpTiming;
use crate::config::{Backend, BenchmarkConfig, Operation, WorkloadShape};
use crate::error::{BenchError, ErrorKind};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;

/// Generation counter of `run_all` / `write_all` invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl RunId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// A failed measurement, kept distinguishable by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&BenchError> for Failure {
    fn from(err: &BenchError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// One cell of the results table.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    /// Not run yet in the current run.
    #[default]
    Pending,
    /// Mean per-item duration in milliseconds.
    Millis(f64),
    /// The operation ran over zero items.
    NoData,
    Failed(Failure),
}

impl Cell {
    /// Cell for a completed operation.
    pub fn from_timing(timing: &OpTiming) -> Self {
        timing.mean_ms().map_or(Self::NoData, Self::Millis)
    }

    pub fn from_result(result: &crate::error::Result<OpTiming>) -> Self {
        match result {
            Ok(timing) => Self::from_timing(timing),
            Err(err) => Self::Failed(Failure::from(err)),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn millis(&self) -> Option<f64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

// Number, null, or the failure object.
impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Millis(ms) => serializer.serialize_f64(*ms),
            Self::Pending | Self::NoData => serializer.serialize_none(),
            Self::Failed(failure) => failure.serialize(serializer),
        }
    }
}

/// Write and read cells for one workload shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeResults {
    pub write_time: Cell,
    pub read_time: Cell,
}

impl ShapeResults {
    pub fn cell(&self, operation: Operation) -> &Cell {
        match operation {
            Operation::Write => &self.write_time,
            Operation::Read => &self.read_time,
        }
    }

    fn cell_mut(&mut self, operation: Operation) -> &mut Cell {
        match operation {
            Operation::Write => &mut self.write_time,
            Operation::Read => &mut self.read_time,
        }
    }
}

/// Row of the results table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResults {
    pub single_file: Option<ShapeResults>,
    pub multiple_files: Option<ShapeResults>,
}

impl BackendResults {
    pub fn shape(&self, shape: WorkloadShape) -> Option<&ShapeResults> {
        match shape {
            WorkloadShape::SingleFile => self.single_file.as_ref(),
            WorkloadShape::MultipleFiles => self.multiple_files.as_ref(),
        }
    }

    fn shape_mut(&mut self, shape: WorkloadShape) -> &mut ShapeResults {
        let slot = match shape {
            WorkloadShape::SingleFile => &mut self.single_file,
            WorkloadShape::MultipleFiles => &mut self.multiple_files,
        };
        slot.get_or_insert_with(ShapeResults::default)
    }
}

/// Result of one backend for one shape, ready to merge.
///
/// A `Pending` cell leaves the table untouched, so a write-only or read-only
/// outcome never erases the other half.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub backend: Backend,
    pub shape: WorkloadShape,
    pub write_time: Cell,
    pub read_time: Cell,
}

impl TestOutcome {
    pub fn new(backend: Backend, shape: WorkloadShape) -> Self {
        Self {
            backend,
            shape,
            write_time: Cell::Pending,
            read_time: Cell::Pending,
        }
    }

    #[must_use]
    pub fn with_write(mut self, cell: Cell) -> Self {
        self.write_time = cell;
        self
    }

    #[must_use]
    pub fn with_read(mut self, cell: Cell) -> Self {
        self.read_time = cell;
        self
    }

    /// Both cells failed with the same error.
    pub fn failed(backend: Backend, shape: WorkloadShape, failure: Failure) -> Self {
        Self::new(backend, shape)
            .with_write(Cell::Failed(failure.clone()))
            .with_read(Cell::Failed(failure))
    }
}

/// Flat view of one table cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement<'a> {
    pub backend: Backend,
    pub shape: WorkloadShape,
    pub operation: Operation,
    pub cell: &'a Cell,
}

/// Backend x shape results of the current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultsTable {
    #[serde(skip)]
    run: RunId,
    #[serde(flatten)]
    entries: BTreeMap<Backend, BackendResults>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the table currently belongs to.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Clear every entry and start collecting for `run`.
    pub fn reset(&mut self, run: RunId) {
        self.run = run;
        self.entries.clear();
    }

    /// Record an outcome. Non-pending cells overwrite; pending cells are
    /// ignored.
    pub fn merge(&mut self, outcome: TestOutcome) {
        let shape = self
            .entries
            .entry(outcome.backend)
            .or_default()
            .shape_mut(outcome.shape);
        for (operation, cell) in [
            (Operation::Write, outcome.write_time),
            (Operation::Read, outcome.read_time),
        ] {
            if !cell.is_pending() {
                *shape.cell_mut(operation) = cell;
            }
        }
    }

    pub fn get(&self, backend: Backend) -> Option<&BackendResults> {
        self.entries.get(&backend)
    }

    /// Cell for (backend, shape, operation); `Pending` when absent.
    pub fn cell(&self, backend: Backend, shape: WorkloadShape, operation: Operation) -> &Cell {
        static PENDING: Cell = Cell::Pending;
        self.entries
            .get(&backend)
            .and_then(|row| row.shape(shape))
            .map_or(&PENDING, |results| results.cell(operation))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every backend has a non-pending cell for every shape and
    /// operation.
    pub fn is_complete(&self) -> bool {
        self.measurements().iter().all(|m| !m.cell.is_pending())
    }

    /// All failed cells in table order.
    pub fn failures(&self) -> Vec<(Backend, WorkloadShape, Operation, &Failure)> {
        self.measurements()
            .into_iter()
            .filter_map(|m| {
                m.cell
                    .failure()
                    .map(|failure| (m.backend, m.shape, m.operation, failure))
            })
            .collect()
    }

    /// Flat list of every cell in table order.
    pub fn measurements(&self) -> Vec<Measurement<'_>> {
        cells()
            .map(|(backend, shape, operation)| Measurement {
                backend,
                shape,
                operation,
                cell: self.cell(backend, shape, operation),
            })
            .collect()
    }
}

fn cells() -> impl Iterator<Item = (Backend, WorkloadShape, Operation)> {
    Backend::all().into_iter().flat_map(|backend| {
        WorkloadShape::all().into_iter().flat_map(move |shape| {
            [Operation::Write, Operation::Read]
                .into_iter()
                .map(move |operation| (backend, shape, operation))
        })
    })
}

/// JSON report of the current run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport<'a> {
    pub metadata: ReportMetadata,
    pub results: &'a ResultsTable,
    pub failures: Vec<ReportFailure<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub timestamp: String,
    pub platform: String,
    pub storebench_version: String,
    pub single_file_bytes: usize,
    pub file_count: usize,
    pub file_bytes: usize,
    pub verify: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFailure<'a> {
    pub backend: Backend,
    pub shape: WorkloadShape,
    pub operation: Operation,
    #[serde(flatten)]
    pub failure: &'a Failure,
}

/// Write the current run to `path` as pretty-printed JSON.
pub fn export_json(
    table: &ResultsTable,
    config: &BenchmarkConfig,
    path: &Path,
) -> anyhow::Result<()> {
    let report = BenchmarkReport {
        metadata: ReportMetadata {
            timestamp: chrono::Utc::now().to_rfc3339(),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            storebench_version: env!("CARGO_PKG_VERSION").to_string(),
            single_file_bytes: config.single_file_bytes,
            file_count: config.file_count,
            file_bytes: config.file_bytes,
            verify: config.verify,
        },
        results: table,
        failures: table
            .failures()
            .into_iter()
            .map(|(backend, shape, operation, failure)| ReportFailure {
                backend,
                shape,
                operation,
                failure,
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json)?;

    Ok(())
}
