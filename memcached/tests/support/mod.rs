#![allow(dead_code)]

use std::sync::Arc;

use memcached::{
    CallbackRef, DispatchConfig, Dispatcher, MemcachedNode, NodeAddr, NodeHandle,
    OperationFactory, OperationRef, OperationState, RoundRobinLocator,
};
use memcached_test::{RecordingCallback, RecordingCollector};

pub fn setup_nodes(n: u16) -> Vec<NodeHandle> {
    (0..n)
        .map(|i| MemcachedNode::handle(NodeAddr::new(format!("10.0.0.{i}"), 11211)))
        .collect()
}

pub fn set_inactive(nodes: &[NodeHandle], which: &[usize]) {
    for &i in which {
        nodes[i].set_active(false).unwrap();
    }
}

pub fn assert_same_node(expected: &NodeHandle, actual: &NodeHandle) {
    assert!(
        Arc::ptr_eq(expected, actual),
        "expected {expected:?}, got {actual:?}"
    );
}

/// Moves a freshly built operation to `Retry` without a node.
pub fn into_retry(op: &OperationRef) {
    op.transition_state(OperationState::WriteQueued).unwrap();
    op.transition_state(OperationState::Retry).unwrap();
}

pub struct TestContext {
    pub nodes: Vec<NodeHandle>,
    pub locator: Arc<RoundRobinLocator>,
    pub collector: Arc<RecordingCollector>,
    pub factory: Arc<OperationFactory>,
    pub dispatcher: Dispatcher,
}

impl TestContext {
    pub fn new(nodes: u16) -> Self {
        Self::with_config(nodes, DispatchConfig::default())
    }

    pub fn with_config(nodes: u16, config: DispatchConfig) -> Self {
        let nodes = setup_nodes(nodes);
        let locator = Arc::new(RoundRobinLocator::new(nodes.clone()).unwrap());
        let collector = Arc::new(RecordingCollector::default());
        let factory = Arc::new(OperationFactory::new(collector.clone()));
        let dispatcher = Dispatcher::new(locator.clone(), factory.clone(), config);
        TestContext {
            nodes,
            locator,
            collector,
            factory,
            dispatcher,
        }
    }

    pub fn callback(&self) -> Arc<RecordingCallback> {
        Arc::new(RecordingCallback::default())
    }
}

pub fn as_callback(callback: &Arc<RecordingCallback>) -> CallbackRef {
    callback.clone()
}
