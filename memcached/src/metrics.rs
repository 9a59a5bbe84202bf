//! Metric collectors that receive the latency samples of operation state changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::trace;

/// Destination of latency samples.
///
/// Implementations are called on the hot path of every state transition and
/// must not block.
pub trait MetricCollector: Send + Sync {
    /// Registers a histogram. Called once per name.
    fn add_histogram(&self, name: &str);

    /// Records `value` into the named histogram.
    fn update_histogram(&self, name: &str, value: u64);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricCollector;

impl MetricCollector for NoopMetricCollector {
    fn add_histogram(&self, _name: &str) {}

    fn update_histogram(&self, _name: &str, _value: u64) {}
}

/// Histogram bucket upper bounds in microseconds.
const LATENCY_BUCKETS_US: [u64; 12] = [
    10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 50_000, 100_000,
];

/// Fixed-bucket histogram made of atomics.
struct LatencyHistogram {
    counts: [AtomicU64; LATENCY_BUCKETS_US.len() + 1],
    count: AtomicU64,
    total: AtomicU64,
    max: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        let idx = LATENCY_BUCKETS_US
            .iter()
            .position(|upper| value <= *upper)
            .unwrap_or(LATENCY_BUCKETS_US.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        let mut buckets = [0u64; LATENCY_BUCKETS_US.len() + 1];
        for (bucket, counter) in buckets.iter_mut().zip(self.counts.iter()) {
            *bucket = counter.load(Ordering::Relaxed);
        }
        HistogramSnapshot {
            count,
            avg: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
            p50: percentile(&buckets, 50.0, max),
            p95: percentile(&buckets, 95.0, max),
            p99: percentile(&buckets, 99.0, max),
            max,
        }
    }
}

/// Upper bound of the bucket holding the `p`th percentile.
fn percentile(counts: &[u64; LATENCY_BUCKETS_US.len() + 1], p: f64, max: u64) -> u64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = (total as f64 * (p / 100.0)).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, count) in counts.iter().enumerate() {
        cumulative += *count;
        if cumulative >= target {
            return match LATENCY_BUCKETS_US.get(i) {
                Some(upper) => (*upper).min(max),
                // Overflow bucket.
                None => max,
            };
        }
    }
    max
}

/// Point-in-time view of a histogram, in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of samples.
    pub count: u64,
    /// Mean of all samples.
    pub avg: f64,
    /// Median, rounded up to a bucket bound.
    pub p50: u64,
    /// 95th percentile, rounded up to a bucket bound.
    pub p95: u64,
    /// 99th percentile, rounded up to a bucket bound.
    pub p99: u64,
    /// Largest sample.
    pub max: u64,
}

/// In-process collector keeping one bucketed histogram per name.
///
/// Registration takes a write lock; recording only takes the read lock and
/// updates atomics.
#[derive(Default)]
pub struct BucketedMetricCollector {
    histograms: RwLock<HashMap<String, Arc<LatencyHistogram>>>,
}

impl BucketedMetricCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all registered histograms, sorted.
    pub fn names(&self) -> Vec<String> {
        let histograms = self
            .histograms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<_> = histograms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the named histogram, if it is registered.
    pub fn snapshot(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .map(|histogram| histogram.snapshot())
    }
}

impl MetricCollector for BucketedMetricCollector {
    fn add_histogram(&self, name: &str) {
        self.histograms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_default();
    }

    fn update_histogram(&self, name: &str, value: u64) {
        let histograms = self
            .histograms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match histograms.get(name) {
            Some(histogram) => histogram.record(value),
            None => trace!("Dropping sample for unregistered histogram {name}"),
        }
    }
}

/// Forwards samples to the [`metrics`] facade, so any installed exporter
/// (Prometheus, statsd, ...) receives them.
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
#[derive(Default)]
pub struct MetricsRsCollector {
    handles: RwLock<HashMap<String, ::metrics::Histogram>>,
}

#[cfg(feature = "metrics")]
impl MetricsRsCollector {
    /// Creates a collector with no registered histograms.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "metrics")]
impl MetricCollector for MetricsRsCollector {
    fn add_histogram(&self, name: &str) {
        let mut handles = self
            .handles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !handles.contains_key(name) {
            handles.insert(name.to_string(), ::metrics::histogram!(name.to_string()));
        }
    }

    fn update_histogram(&self, name: &str, value: u64) {
        let handles = self
            .handles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(histogram) = handles.get(name) {
            histogram.record(value as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketed_collector_records_registered_histograms() {
        let collector = BucketedMetricCollector::new();
        collector.add_histogram("h");
        for value in [5, 20, 20, 400, 200_000] {
            collector.update_histogram("h", value);
        }
        collector.update_histogram("unregistered", 1);

        let snapshot = collector.snapshot("h").unwrap();
        assert_eq!(snapshot.count, 5);
        assert_eq!(snapshot.max, 200_000);
        assert_eq!(snapshot.p50, 25);
        assert_eq!(snapshot.p99, 200_000);
        assert_eq!(collector.names(), vec!["h".to_string()]);
        assert!(collector.snapshot("unregistered").is_none());
    }

    #[test]
    fn registering_twice_keeps_samples() {
        let collector = BucketedMetricCollector::new();
        collector.add_histogram("h");
        collector.update_histogram("h", 7);
        collector.add_histogram("h");
        assert_eq!(collector.snapshot("h").unwrap().count, 1);
    }

    #[test]
    fn empty_histogram_snapshot() {
        let collector = BucketedMetricCollector::new();
        collector.add_histogram("h");
        assert_eq!(collector.snapshot("h").unwrap(), HistogramSnapshot::default());
    }
}
