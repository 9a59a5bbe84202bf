//! State-change instrumentation.
//!
//! Every operation built by the factory carries a [`MonitoringObserver`], which
//! turns each state transition into a latency sample for two histograms: one
//! per `(from, to)` edge and one per `(from, to, node)` triple. Metric names
//! are formatted once per key and then reused from a [`MetricNameCache`] owned
//! by the factory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arcstr::ArcStr;

use crate::metrics::MetricCollector;
use crate::node::{Node, NodeAddr};
use crate::ops::{Operation, OperationState};

/// Observes every state transition of an operation.
pub trait StateChangeObserver: Send + Sync {
    /// Called after `op` moved from `prev` to `current`, `elapsed` after it
    /// entered `prev`.
    fn state_changed(
        &self,
        op: &Operation,
        prev: OperationState,
        current: OperationState,
        elapsed: Duration,
    );
}

type Edge = (OperationState, OperationState);

/// Lazily populated, never evicted cache of metric names.
///
/// Bounded by the number of state pairs times the number of node addresses
/// ever seen.
pub struct MetricNameCache {
    collector: Arc<dyn MetricCollector>,
    overall: RwLock<HashMap<Edge, ArcStr>>,
    per_node: RwLock<HashMap<(Edge, NodeAddr), ArcStr>>,
    formatted: AtomicUsize,
}

impl MetricNameCache {
    /// Creates an empty cache that registers new names with `collector`.
    pub fn new(collector: Arc<dyn MetricCollector>) -> Self {
        Self {
            collector,
            overall: RwLock::default(),
            per_node: RwLock::default(),
            formatted: AtomicUsize::new(0),
        }
    }

    /// Name of the histogram aggregating the `prev -> current` edge over all nodes.
    pub fn overall_name(&self, prev: OperationState, current: OperationState) -> ArcStr {
        let key = (prev, current);
        if let Some(name) = read(&self.overall).get(&key) {
            return name.clone();
        }
        let mut names = write(&self.overall);
        names
            .entry(key)
            .or_insert_with(|| {
                self.register(format!("overall-time-from-{prev}-to-{current}"))
            })
            .clone()
    }

    /// Name of the histogram for the `prev -> current` edge on the node at `address`.
    pub fn node_name(
        &self,
        prev: OperationState,
        current: OperationState,
        address: &NodeAddr,
    ) -> ArcStr {
        let key = ((prev, current), address.clone());
        if let Some(name) = read(&self.per_node).get(&key) {
            return name.clone();
        }
        let mut names = write(&self.per_node);
        names
            .entry(key)
            .or_insert_with(|| {
                self.register(format!("node-{address}-time-from-{prev}-to-{current}"))
            })
            .clone()
    }

    /// How many names have been formatted so far.
    pub fn formatted_count(&self) -> usize {
        self.formatted.load(Ordering::Relaxed)
    }

    fn register(&self, name: String) -> ArcStr {
        self.formatted.fetch_add(1, Ordering::Relaxed);
        self.collector.add_histogram(&name);
        name.into()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records transition latencies, in microseconds, into cached histograms.
pub struct MonitoringObserver {
    names: Arc<MetricNameCache>,
    collector: Arc<dyn MetricCollector>,
}

impl MonitoringObserver {
    /// Creates an observer sharing `names` with every other observer of the
    /// same factory.
    pub fn new(names: Arc<MetricNameCache>, collector: Arc<dyn MetricCollector>) -> Self {
        Self { names, collector }
    }
}

impl StateChangeObserver for MonitoringObserver {
    fn state_changed(
        &self,
        op: &Operation,
        prev: OperationState,
        current: OperationState,
        elapsed: Duration,
    ) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let overall = self.names.overall_name(prev, current);
        self.collector.update_histogram(&overall, micros);

        // Operations cancelled before dispatch never had a node.
        if let Some(node) = op.handling_node() {
            let per_node = self.names.node_name(prev, current, node.address());
            self.collector.update_histogram(&per_node, micros);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Registrations(Mutex<Vec<String>>);

    impl MetricCollector for Registrations {
        fn add_histogram(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }

        fn update_histogram(&self, _name: &str, _value: u64) {}
    }

    #[test]
    fn names_are_formatted_once_and_reused() {
        let collector = Arc::new(Registrations::default());
        let cache = MetricNameCache::new(collector.clone());
        let addr = NodeAddr::new("10.0.0.1", 11211);

        let first = cache.overall_name(OperationState::Writing, OperationState::Reading);
        let first_node =
            cache.node_name(OperationState::Writing, OperationState::Reading, &addr);
        for _ in 0..10 {
            let again = cache.overall_name(OperationState::Writing, OperationState::Reading);
            assert!(ArcStr::ptr_eq(&first, &again));
            let again =
                cache.node_name(OperationState::Writing, OperationState::Reading, &addr);
            assert!(ArcStr::ptr_eq(&first_node, &again));
        }

        assert_eq!(cache.formatted_count(), 2);
        assert_eq!(
            *collector.0.lock().unwrap(),
            vec![
                "overall-time-from-WRITING-to-READING".to_string(),
                "node-10.0.0.1:11211-time-from-WRITING-to-READING".to_string(),
            ]
        );
    }

    #[test]
    fn distinct_nodes_get_distinct_names() {
        let cache = MetricNameCache::new(Arc::new(Registrations::default()));
        let a = cache.node_name(
            OperationState::Reading,
            OperationState::Complete,
            &NodeAddr::new("a", 1),
        );
        let b = cache.node_name(
            OperationState::Reading,
            OperationState::Complete,
            &NodeAddr::new("b", 1),
        );
        assert_ne!(a, b);
        assert_eq!(cache.formatted_count(), 2);
    }
}
