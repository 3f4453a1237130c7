//! Messages exchanged with the worker context.

use crate::bench::OpTiming;
use crate::config::{Operation, WorkloadShape};
use crate::results::{Failure, RunId};
use crate::workload::Workload;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation ID carried by every request and echoed in its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Get the raw ID value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Atomic request ID generator.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate the next request ID.
    pub fn next(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    RoundTrip,
    Write,
    Read,
}

/// What the worker should measure.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Write then read the workload.
    RoundTrip(Workload),
    /// Write only; the workload is kept by the sender for a later `Read`.
    Write(Workload),
    /// Read back a workload written earlier.
    Read(Workload),
}

impl WorkerCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::RoundTrip(_) => CommandKind::RoundTrip,
            Self::Write(_) => CommandKind::Write,
            Self::Read(_) => CommandKind::Read,
        }
    }

    pub fn workload(&self) -> &Workload {
        match self {
            Self::RoundTrip(workload) | Self::Write(workload) | Self::Read(workload) => workload,
        }
    }

    pub fn shape(&self) -> WorkloadShape {
        self.workload().shape()
    }
}

/// Inbound message of the worker context.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub id: RequestId,
    /// Run the request belongs to; the worker skips it once that run is
    /// superseded.
    pub run: RunId,
    pub command: WorkerCommand,
}

/// Failure raised inside the worker, tagged with the phase it hit.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerError {
    pub operation: Operation,
    pub failure: Failure,
}

/// Outbound message of the worker context; exactly one per request.
///
/// `None` timings were not part of the command (or never reached because of
/// `error`).
#[derive(Debug, Clone)]
pub struct WorkerReply {
    pub id: RequestId,
    pub shape: WorkloadShape,
    pub write_time: Option<OpTiming>,
    pub read_time: Option<OpTiming>,
    pub error: Option<WorkerError>,
}

impl WorkerReply {
    pub fn new(id: RequestId, shape: WorkloadShape) -> Self {
        Self {
            id,
            shape,
            write_time: None,
            read_time: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids = RequestIdGenerator::new();
        let first = ids.next();
        let second = ids.next();
        assert_eq!(first.raw(), 1);
        assert!(second > first);
        assert_eq!(second.to_string(), "req-2");
    }

    #[test]
    fn command_reports_its_shape() {
        let command = WorkerCommand::Read(Workload::many(2, 8));
        assert_eq!(command.kind(), CommandKind::Read);
        assert_eq!(command.shape(), WorkloadShape::MultipleFiles);
    }
}
