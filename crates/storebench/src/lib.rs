//! Write/read latency benchmark for origin-private storage backends.
//!
//! Four backends are measured on two workload shapes (one large blob, many
//! small blobs):
//!
//! - the origin-private file system through async writable streams,
//! - the HTTP-response cache,
//! - the document key-value store,
//! - the origin-private file system through sync access handles, which only
//!   exist on the isolated worker context.
//!
//! The storage services sit behind a [`platform::Platform`] capability
//! boundary. A [`session::Session`] runs the backends, dispatches the
//! worker-only one through [`worker::Coordinator`] and collects everything
//! in a [`results::ResultsTable`].

pub mod bench;
pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod platform;
pub mod results;
pub mod session;
pub mod worker;
pub mod workload;

pub use config::{Backend, BenchmarkConfig, Operation, WorkloadShape};
pub use error::{BenchError, ErrorKind, Result};
pub use results::{Cell, ResultsTable};
pub use session::{RunState, Session};
pub use workload::Workload;
