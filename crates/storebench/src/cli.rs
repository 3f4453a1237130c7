//! Command-line interface for the benchmark harness.

#![allow(clippy::struct_excessive_bools)]

use crate::config::{BenchmarkConfig, KIB, MIB};
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

/// Write/read latency benchmark for origin-private storage backends.
///
/// Measures the origin-private file system (async streams and sync access
/// handles on a worker context), the response cache and the document store
/// on one large blob and on many small blobs.
#[derive(Parser, Debug)]
#[command(name = "storebench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Origin-private data root shared by all backends.
    #[arg(short = 'r', long, global = true)]
    pub root: Option<PathBuf>,

    /// Size of the single-file workload in MiB.
    #[arg(long, default_value = "100", global = true)]
    pub size_mb: usize,

    /// Number of items in the multiple-files workload.
    #[arg(short = 'n', long, default_value = "100", global = true)]
    pub count: usize,

    /// Size of each multiple-files item in KiB.
    #[arg(long, default_value = "1", global = true)]
    pub item_kb: usize,

    /// Skip comparing read bytes with the written workload.
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Per-operation timeout in seconds.
    #[arg(short = 't', long, default_value = "120", global = true)]
    pub timeout: u64,

    /// Seconds to wait for the worker context after the main run.
    #[arg(long, default_value = "300", global = true)]
    pub worker_timeout: u64,

    /// Simulate a platform without sync access handles.
    #[arg(long, global = true)]
    pub no_sync_handles: bool,

    /// Export results to JSON file.
    #[arg(long, value_name = "FILE", global = true)]
    pub json: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Show per-backend log lines.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Trigger to run.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run all tests: every backend, both workloads (default).
    Run,
    /// Write the single-file workload through every backend.
    Write,
    /// Write, then read back the single-file workload through every backend.
    Read,
}

impl Cli {
    /// Selected command, defaulting to `run`.
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    /// Convert CLI arguments to a benchmark configuration.
    pub fn into_config(self) -> Result<BenchmarkConfig> {
        if self.timeout == 0 {
            bail!("--timeout must be at least one second");
        }
        if self.worker_timeout == 0 {
            bail!("--worker-timeout must be at least one second");
        }
        let Some(single_file_bytes) = self.size_mb.checked_mul(MIB) else {
            bail!("--size-mb {} is too large", self.size_mb);
        };
        let Some(file_bytes) = self.item_kb.checked_mul(KIB) else {
            bail!("--item-kb {} is too large", self.item_kb);
        };

        let root = self.root.unwrap_or_else(BenchmarkConfig::default_root);
        let mut config = BenchmarkConfig::new(root);
        config.single_file_bytes = single_file_bytes;
        config.file_count = self.count;
        config.file_bytes = file_bytes;
        config.op_timeout = Duration::from_secs(self.timeout);
        config.worker_timeout = Duration::from_secs(self.worker_timeout);
        config.verify = !self.no_verify;
        config.sync_access_handles = !self.no_sync_handles;
        config.color = !self.no_color && std::io::stdout().is_terminal();

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_workloads() {
        let cli = Cli::parse_from(["storebench", "--root", "/tmp/sb"]);
        assert_eq!(cli.command(), Command::Run);
        let config = cli.into_config().unwrap();
        assert_eq!(config.single_file_bytes, 100 * MIB);
        assert_eq!(config.file_count, 100);
        assert_eq!(config.file_bytes, KIB);
        assert_eq!(config.op_timeout, Duration::from_secs(120));
        assert!(config.verify);
        assert!(config.sync_access_handles);
        assert_eq!(config.root, PathBuf::from("/tmp/sb"));
    }

    #[test]
    fn subcommand_and_flags() {
        let cli = Cli::parse_from([
            "storebench",
            "read",
            "--size-mb",
            "2",
            "--count",
            "0",
            "--no-verify",
            "--no-sync-handles",
            "--no-color",
        ]);
        assert_eq!(cli.command(), Command::Read);
        let config = cli.into_config().unwrap();
        assert_eq!(config.single_file_bytes, 2 * MIB);
        assert_eq!(config.file_count, 0);
        assert!(!config.verify);
        assert!(!config.sync_access_handles);
        assert!(!config.color);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = Cli::parse_from(["storebench", "--timeout", "0"]);
        assert!(cli.into_config().is_err());
    }
}
