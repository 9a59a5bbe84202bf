//! Routing of keys to nodes.

mod round_robin;

use std::sync::Arc;

pub use round_robin::RoundRobinLocator;

use crate::errors::MemcachedResult;
use crate::node::NodeHandle;

/// Maps keys onto the current set of nodes.
///
/// Locators never perform I/O and never touch operation state.
pub trait NodeLocator: Send + Sync {
    /// The node that should serve `key`. Never fails: with no healthy node a
    /// best-effort node is still returned.
    fn primary(&self, key: &str) -> NodeHandle;

    /// Fallback nodes for `key`, starting after the most recent primary
    /// selection and visiting every other node once.
    fn sequence(&self, key: &str) -> NodeSequence;

    /// Every node currently known to the locator.
    fn all(&self) -> Vec<NodeHandle>;

    /// A frozen copy whose nodes are read-only views.
    fn readonly_copy(&self) -> Box<dyn NodeLocator>;

    /// Replaces the whole node set at once.
    ///
    /// Operations already queued on the old nodes stay where they are.
    fn update_locator(&self, nodes: Vec<NodeHandle>) -> MemcachedResult<()>;
}

/// Finite, lazy walk over a snapshot of the node set.
///
/// The walk begins right after `start` and wraps around; reaching `start`
/// again ends it, so `start` itself is never yielded. Cloning or calling
/// [`restart`](Self::restart) walks the same snapshot again.
#[derive(Clone)]
pub struct NodeSequence {
    nodes: Arc<Vec<NodeHandle>>,
    start: usize,
    next: Option<usize>,
}

impl NodeSequence {
    pub(crate) fn new(nodes: Arc<Vec<NodeHandle>>, start: usize) -> Self {
        let mut sequence = Self {
            nodes,
            start,
            next: None,
        };
        sequence.restart();
        sequence
    }

    /// Rewinds the walk to its first node.
    pub fn restart(&mut self) {
        self.next = Some(self.start);
        self.advance();
    }

    fn advance(&mut self) {
        if let Some(current) = self.next {
            let mut next = current + 1;
            if next >= self.nodes.len() {
                next = 0;
            }
            self.next = (next != self.start).then_some(next);
        }
    }

    fn remaining(&self) -> usize {
        match self.next {
            Some(next) if next > self.start => self.nodes.len() - next + self.start,
            Some(next) => self.start - next,
            None => 0,
        }
    }
}

impl Iterator for NodeSequence {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        let node = self.nodes[index].clone();
        self.advance();
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for NodeSequence {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MemcachedNode, Node, NodeAddr};

    fn nodes(n: u16) -> Arc<Vec<NodeHandle>> {
        Arc::new(
            (0..n)
                .map(|i| MemcachedNode::handle(NodeAddr::new("node", i)))
                .collect(),
        )
    }

    fn ports(sequence: NodeSequence) -> Vec<u16> {
        sequence.map(|n| n.address().port()).collect()
    }

    #[test]
    fn sequence_wraps_and_skips_start() {
        let sequence = NodeSequence::new(nodes(5), 2);
        assert_eq!(sequence.len(), 4);
        assert_eq!(ports(sequence), vec![3, 4, 0, 1]);
    }

    #[test]
    fn sequence_from_last_index() {
        assert_eq!(ports(NodeSequence::new(nodes(3), 2)), vec![0, 1]);
        assert_eq!(ports(NodeSequence::new(nodes(3), 0)), vec![1, 2]);
    }

    #[test]
    fn single_node_sequence_is_empty() {
        let mut sequence = NodeSequence::new(nodes(1), 0);
        assert_eq!(sequence.len(), 0);
        assert!(sequence.next().is_none());
    }

    #[test]
    fn sequence_restarts() {
        let mut sequence = NodeSequence::new(nodes(3), 1);
        assert_eq!(sequence.next().unwrap().address().port(), 2);
        assert_eq!(sequence.len(), 1);
        sequence.restart();
        assert_eq!(ports(sequence), vec![2, 0]);
    }
}
