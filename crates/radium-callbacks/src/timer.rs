//! Wall-clock timing of callbacks within a single epoch trigger.
//!
//! A `CallbackTimeLogger` lives for one `Callbacks::trigger_epoch` call. Each
//! callback runs inside a `TimedScope`, which records the elapsed time when it
//! is dropped, so failing callbacks are still accounted for. At the end of the
//! call the logger emits one digest line naming the callbacks that dominated a
//! slow epoch trigger.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// Thresholds deciding which timings make it into the digest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingThresholds {
    /// Below this total (seconds) nothing is logged.
    #[serde(default = "default_min_total_secs")]
    pub min_total_secs: f64,
    /// An entry must take more than this fraction of the total.
    #[serde(default = "default_min_fraction")]
    pub min_fraction: f64,
    /// An entry must also take more than this many seconds.
    #[serde(default = "default_min_secs")]
    pub min_secs: f64,
}

fn default_min_total_secs() -> f64 {
    3.0
}

fn default_min_fraction() -> f64 {
    0.3
}

fn default_min_secs() -> f64 {
    1.0
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self {
            min_total_secs: default_min_total_secs(),
            min_fraction: default_min_fraction(),
            min_secs: default_min_secs(),
        }
    }
}

/// Append-only log of `(name, duration)` pairs plus a running total.
#[derive(Debug, Default)]
pub struct CallbackTimeLogger {
    thresholds: TimingThresholds,
    times: Vec<(String, Duration)>,
    total: Duration,
}

impl CallbackTimeLogger {
    #[must_use]
    pub fn new(thresholds: TimingThresholds) -> Self {
        Self {
            thresholds,
            times: Vec::new(),
            total: Duration::ZERO,
        }
    }

    /// Record an already measured duration.
    pub fn add(&mut self, name: impl Into<String>, elapsed: Duration) {
        self.total += elapsed;
        self.times.push((name.into(), elapsed));
    }

    /// Start timing `name`. The entry is recorded when the scope is dropped.
    pub fn timed(&mut self, name: impl Into<String>) -> TimedScope<'_> {
        TimedScope {
            logger: self,
            name: Some(name.into()),
            start: Instant::now(),
        }
    }

    /// Run `f` inside a timed scope and hand back its result unchanged.
    pub fn time<T>(&mut self, name: impl Into<String>, f: impl FnOnce() -> T) -> T {
        let _scope = self.timed(name);
        f()
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, Duration)] {
        &self.times
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Build the digest line, or `None` when the total is too small to matter.
    #[must_use]
    pub fn summarize(&self) -> Option<String> {
        let total = self.total.as_secs_f64();
        if total < self.thresholds.min_total_secs {
            return None;
        }

        let msgs: Vec<String> = self
            .times
            .iter()
            .filter(|(_, t)| {
                let secs = t.as_secs_f64();
                secs / total > self.thresholds.min_fraction && secs > self.thresholds.min_secs
            })
            .map(|(name, t)| format!("{}:{:.3}sec", name, t.as_secs_f64()))
            .collect();

        Some(format!("Callbacks took {:.3} sec in total. {}", total, msgs.join(" ")))
    }

    /// Emit the digest through `tracing` and discard the log.
    pub fn log(self) -> Option<String> {
        let line = self.summarize()?;
        info!(total_secs = self.total.as_secs_f64(), "{}", line);
        Some(line)
    }
}

/// Guard returned by [`CallbackTimeLogger::timed`].
#[must_use = "the duration is recorded when the scope is dropped"]
pub struct TimedScope<'a> {
    logger: &'a mut CallbackTimeLogger,
    name: Option<String>,
    start: Instant,
}

impl Drop for TimedScope<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            self.logger.add(name, self.start.elapsed());
        }
    }
}
