use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use memcached::{
    BucketedMetricCollector, MetricCollector, MetricNameCache, MonitoringObserver, NodeLocator,
    NoopMetricCollector, OperationFactory, OperationState, RoundRobinLocator,
    StateChangeObserver,
};
use memcached_test::RecordingCallback;

use support::*;

#[path = "../tests/support/mod.rs"]
mod support;

fn bench_primary(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_robin_primary");
    group.throughput(Throughput::Elements(1));
    for (n, inactive) in [(4, vec![]), (16, vec![]), (16, (0..15).collect::<Vec<_>>())] {
        let nodes = setup_nodes(n);
        set_inactive(&nodes, &inactive);
        let locator = RoundRobinLocator::new(nodes).unwrap();
        group.bench_function(format!("{n}-nodes-{}-down", inactive.len()), |b| {
            b.iter(|| locator.primary("key"))
        });
    }
    group.finish();
}

fn bench_sequence(c: &mut Criterion) {
    let locator = RoundRobinLocator::new(setup_nodes(16)).unwrap();
    c.bench_function("round_robin_sequence", |b| {
        b.iter(|| locator.sequence("key").count())
    });
}

fn bench_observer(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_change_observer");
    let collectors: [(&str, Arc<dyn MetricCollector>); 2] = [
        ("noop", Arc::new(NoopMetricCollector)),
        ("bucketed", Arc::new(BucketedMetricCollector::new())),
    ];
    for (name, collector) in collectors {
        let names = Arc::new(MetricNameCache::new(collector.clone()));
        let observer = MonitoringObserver::new(names, collector.clone());
        let factory = OperationFactory::new(collector);
        let node = setup_nodes(1).remove(0);
        let op = factory.get("key", Arc::new(RecordingCallback::default()));
        memcached::enqueue(&node, op.clone()).unwrap();

        group.bench_function(name, |b| {
            b.iter(|| {
                observer.state_changed(
                    &op,
                    OperationState::Writing,
                    OperationState::Reading,
                    Duration::from_micros(120),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(bench, bench_primary, bench_sequence, bench_observer);
criterion_main!(bench);
