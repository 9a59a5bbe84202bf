//! Routing operations onto node queues and redistributing the ones a node
//! could not serve.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::{DispatchConfig, FailureMode};
use crate::driver::{NodeDriver, Transport};
use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::factory::OperationFactory;
use crate::locator::NodeLocator;
use crate::node::{self, Node, NodeHandle};
use crate::ops::{CloneRule, Operation, OperationRef};

/// Connects the locator, the factory and the node queues.
pub struct Dispatcher {
    locator: Arc<dyn NodeLocator>,
    factory: Arc<OperationFactory>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher routing with `locator` and cloning with `factory`.
    pub fn new(
        locator: Arc<dyn NodeLocator>,
        factory: Arc<OperationFactory>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            locator,
            factory,
            config,
        }
    }

    /// The locator used for routing.
    pub fn locator(&self) -> &Arc<dyn NodeLocator> {
        &self.locator
    }

    /// The factory used to clone operations.
    pub fn factory(&self) -> &Arc<OperationFactory> {
        &self.factory
    }

    /// The dispatch configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Queues `op` on the node chosen for its first key, or on any node for
    /// keyless commands.
    ///
    /// When the chosen node is inactive the configured [`FailureMode`]
    /// decides: redistribute to the next active node, queue on the inactive
    /// node anyway, or cancel the operation.
    pub fn dispatch(&self, op: OperationRef) -> MemcachedResult<()> {
        if op.check_cancelled()? {
            return Ok(());
        }
        match self.select_node(&op) {
            Some(node) => {
                trace!("Dispatching {op:?} to {}", node.address());
                node::enqueue(&node, op)
            }
            None => {
                debug!("Cancelling {op:?}, its node is inactive");
                op.cancel();
                Ok(())
            }
        }
    }

    /// Replaces an operation left in `Retry` by clones and dispatches them.
    ///
    /// Returns the dispatched clones. Once the operation has used up the
    /// configured retries it fails with [`ErrorKind::RetriesExhausted`]
    /// instead, and nothing is returned. Node-wide commands are bound to the
    /// node they were sent to and are cancelled.
    ///
    /// Every clone is dispatched even if one of them fails; clones that could
    /// not be queued are ended and the first error is returned.
    pub fn redistribute(&self, op: &Operation) -> MemcachedResult<Vec<OperationRef>> {
        if op.check_cancelled()? {
            return Ok(Vec::new());
        }
        if op.command().clone_rule() == CloneRule::NotCloneable {
            debug!("Cancelling {op:?}, node-wide commands are not redistributed");
            op.cancel();
            op.check_cancelled()?;
            return Ok(Vec::new());
        }
        if op.retries() >= self.config.max_retries() {
            warn!(
                "Giving up on {op:?} after {} retries",
                self.config.max_retries()
            );
            op.fail(MemcachedError::from((
                ErrorKind::RetriesExhausted,
                "Operation was retried too many times",
                format!("{op:?}"),
            )))?;
            return Ok(Vec::new());
        }

        let clones = match self.factory.clone_operation(op) {
            Ok(clones) => clones,
            Err(err) => {
                op.abandon(err.clone_mostly("clone failed"));
                return Err(err);
            }
        };
        let mut first_error = None;
        for clone in &clones {
            if let Err(err) = self.dispatch(clone.clone()) {
                warn!("Could not dispatch {clone:?}: {err}");
                clone.abandon(err.clone_mostly("dispatch failed"));
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(clones),
        }
    }

    /// Drains `node` through `transport` and redistributes everything it
    /// could not serve. Returns the number of operations dispatched again.
    ///
    /// Every returned operation is handled before the first redistribution
    /// error, if any, is reported.
    pub fn handle_io<T: Transport>(
        &self,
        node: &NodeHandle,
        transport: T,
    ) -> MemcachedResult<usize> {
        let retries = NodeDriver::new(node.clone(), transport).drive()?;
        let mut redispatched = 0;
        let mut first_error = None;
        for op in retries {
            match self.redistribute(&op) {
                Ok(clones) => redispatched += clones.len(),
                Err(err) => {
                    warn!("Could not redistribute {op:?}: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(redispatched),
        }
    }

    fn select_node(&self, op: &Operation) -> Option<NodeHandle> {
        let key = op.keys().first().map(String::as_str).unwrap_or_default();
        let rejected = op.not_my_vbucket_nodes();
        let is_rejected = |node: &NodeHandle| rejected.iter().any(|r| Arc::ptr_eq(r, node));

        let primary = self.locator.primary(key);
        let primary_rejected = is_rejected(&primary);
        if primary.is_active() && !primary_rejected {
            return Some(primary);
        }

        match self.config.failure_mode() {
            FailureMode::Cancel if !primary.is_active() => None,
            FailureMode::Retry if !primary_rejected => Some(primary),
            _ => {
                let alternative = self
                    .locator
                    .sequence(key)
                    .find(|node| node.is_active() && !is_rejected(node));
                Some(alternative.unwrap_or(primary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::RoundRobinLocator;
    use crate::metrics::NoopMetricCollector;
    use crate::node::{MemcachedNode, NodeAddr};
    use crate::ops::{CallbackRef, OperationCallback, OperationState, OperationStatus};

    struct Ignore;

    impl OperationCallback for Ignore {
        fn received_status(&self, _status: &OperationStatus) {}
        fn complete(&self) {}
    }

    fn callback() -> CallbackRef {
        Arc::new(Ignore)
    }

    fn setup(n: u16, config: DispatchConfig) -> (Dispatcher, Vec<NodeHandle>) {
        let nodes: Vec<_> = (0..n)
            .map(|i| MemcachedNode::handle(NodeAddr::new(format!("10.0.0.{i}"), 11211)))
            .collect();
        let locator = Arc::new(RoundRobinLocator::new(nodes.clone()).unwrap());
        let factory = Arc::new(OperationFactory::new(Arc::new(NoopMetricCollector)));
        (Dispatcher::new(locator, factory, config), nodes)
    }

    #[test]
    fn dispatch_queues_on_the_primary() {
        let (dispatcher, nodes) = setup(2, DispatchConfig::default());
        let op = dispatcher.factory().get("a", callback());
        dispatcher.dispatch(op.clone()).unwrap();

        assert_eq!(op.state(), OperationState::WriteQueued);
        assert!(Arc::ptr_eq(&op.handling_node().unwrap(), &nodes[0]));
        assert_eq!(nodes[0].queue_len(), 1);
    }

    #[test]
    fn inactive_node_with_cancel_mode_cancels() {
        let config = DispatchConfig::new().set_failure_mode(FailureMode::Cancel);
        let (dispatcher, nodes) = setup(1, config);
        nodes[0].set_active(false).unwrap();

        let op = dispatcher.factory().version(callback());
        dispatcher.dispatch(op.clone()).unwrap();
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(nodes[0].queue_len(), 0);
    }

    #[test]
    fn inactive_node_with_retry_mode_still_queues() {
        let config = DispatchConfig::new().set_failure_mode(FailureMode::Retry);
        let (dispatcher, nodes) = setup(1, config);
        nodes[0].set_active(false).unwrap();

        let op = dispatcher.factory().version(callback());
        dispatcher.dispatch(op.clone()).unwrap();
        assert_eq!(op.state(), OperationState::WriteQueued);
        assert_eq!(nodes[0].queue_len(), 1);
    }

    #[test]
    fn redistribution_avoids_rejecting_nodes() {
        let (dispatcher, nodes) = setup(2, DispatchConfig::default());
        let op = dispatcher.factory().get("a", callback());
        dispatcher.dispatch(op.clone()).unwrap();
        nodes[0].take_op().unwrap();
        op.retry(Some(nodes[0].clone())).unwrap();

        // The cursor points back at the rejecting node.
        dispatcher.locator().primary("x");
        let clones = dispatcher.redistribute(&op).unwrap();
        assert_eq!(clones.len(), 1);
        assert!(Arc::ptr_eq(&clones[0].handling_node().unwrap(), &nodes[1]));
    }

    #[test]
    fn node_wide_retries_are_cancelled() {
        let (dispatcher, nodes) = setup(2, DispatchConfig::default());
        let op = dispatcher.factory().stats(None, callback());
        node::enqueue(&nodes[0], op.clone()).unwrap();
        op.retry(None).unwrap();

        assert!(dispatcher.redistribute(&op).unwrap().is_empty());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(nodes[1].queue_len(), 0);
    }

    #[test]
    fn retry_budget_is_enforced() {
        let (dispatcher, _) = setup(1, DispatchConfig::new().set_max_retries(0));
        let op = dispatcher.factory().get("a", callback());
        dispatcher.dispatch(op.clone()).unwrap();
        op.retry(None).unwrap();

        assert!(dispatcher.redistribute(&op).unwrap().is_empty());
        assert_eq!(op.state(), OperationState::Error);
        assert_eq!(op.error().unwrap().kind(), ErrorKind::RetriesExhausted);
    }
}
