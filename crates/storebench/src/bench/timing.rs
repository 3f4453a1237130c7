//! Timing harness.
//!
//! The stopwatch wraps only the transfer itself: callers acquire root
//! handles, caches and database connections before calling [`Stopwatch::time`]
//! so setup never lands inside the measured interval.

use crate::config::Backend;
use crate::error::{BenchError, Result};
use quanta::Clock;
use std::future::Future;
use std::time::Duration;

/// Monotonic stopwatch with a per-operation deadline.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    clock: Clock,
    backend: Backend,
    timeout: Duration,
}

impl Stopwatch {
    pub fn new(backend: Backend, timeout: Duration) -> Self {
        Self {
            clock: Clock::new(),
            backend,
            timeout,
        }
    }

    /// Time `op`, failing with `Timeout` if it outlives the deadline.
    ///
    /// `op` must be lazy (an `async` block) so that nothing runs before the
    /// clock starts.
    pub async fn time<T, F>(&self, op: F) -> Result<(T, Duration)>
    where
        F: Future<Output = Result<T>>,
    {
        let start = self.clock.now();
        let output = tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| BenchError::Timeout {
                backend: self.backend,
                after: self.timeout,
            })??;
        let elapsed = self.clock.now().duration_since(start);
        Ok((output, elapsed))
    }

    /// Time a blocking `op`. The deadline is enforced by whoever waits on the
    /// blocking context, not here.
    pub fn time_blocking<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<(T, Duration)> {
        let start = self.clock.now();
        let output = op()?;
        Ok((output, self.clock.now().duration_since(start)))
    }
}

/// Per-item durations of one write or read over a workload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpTiming {
    samples: Vec<Duration>,
}

impl OpTiming {
    pub fn from_samples(samples: Vec<Duration>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean per-item duration in milliseconds; `None` without samples.
    pub fn mean_ms(&self) -> Option<f64> {
        mean_ms(&self.samples)
    }
}

/// Arithmetic mean of `samples`; `None` for an empty slice.
pub fn mean(samples: &[Duration]) -> Option<Duration> {
    let count = u32::try_from(samples.len()).ok().filter(|&n| n > 0)?;
    Some(samples.iter().sum::<Duration>() / count)
}

/// Arithmetic mean of `samples` in fractional milliseconds.
///
/// Returns `None` for an empty slice rather than dividing by zero.
pub fn mean_ms(samples: &[Duration]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().copied().map(as_millis_f64).sum();
    Some(total / samples.len() as f64)
}

/// Duration as fractional milliseconds.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
