//! Fact execution metrics.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;

use xfi_types::FactMetric;

#[derive(Default, Clone)]
struct Accumulator {
    count: u64,
    total: Duration,
    max: Duration,
    last: Duration,
}

/// Shared per-run store of fact execution metrics.
///
/// Safe under concurrent recording from evaluation workers; reset at run
/// boundaries only.
#[derive(Default)]
pub struct FactMetricsStore {
    inner: Mutex<HashMap<String, Accumulator>>,
}

fn round4(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}

impl FactMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one execution of the named fact. Failed executions are
    /// recorded too.
    pub fn record(&self, fact: &str, elapsed: Duration) {
        let mut inner = self.inner.lock();
        let acc = inner.entry(fact.to_string()).or_default();
        acc.count += 1;
        acc.total += elapsed;
        acc.last = elapsed;
        if elapsed > acc.max {
            acc.max = elapsed;
        }
    }

    /// Execution count for one fact.
    pub fn execution_count(&self, fact: &str) -> u64 {
        self.inner.lock().get(fact).map(|a| a.count).unwrap_or(0)
    }

    /// Snapshot for the result document. Seconds are 4-decimal fixed.
    pub fn snapshot(&self) -> BTreeMap<String, FactMetric> {
        let inner = self.inner.lock();
        inner
            .iter()
            .map(|(name, acc)| {
                let total = round4(acc.total.as_secs_f64());
                let average = if acc.count > 0 {
                    round4(acc.total.as_secs_f64() / acc.count as f64)
                } else {
                    0.0
                };
                (
                    name.clone(),
                    FactMetric {
                        execution_count: acc.count,
                        total_seconds: total,
                        max_seconds: round4(acc.max.as_secs_f64()),
                        last_seconds: round4(acc.last.as_secs_f64()),
                        average_seconds: average,
                    },
                )
            })
            .collect()
    }

    /// Clears all metrics. Run boundaries only.
    pub fn reset(&self) {
        self.inner.lock().clear();
    }
}
