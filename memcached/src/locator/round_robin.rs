use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use log::{trace, warn};

use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::node::{Node, NodeHandle, ReadonlyNode};

use super::{NodeLocator, NodeSequence};

/// Locator that rotates through the active nodes, ignoring keys.
///
/// A single cursor is shared by all callers. Selection scans forward from the
/// cursor for at most one lap, skipping inactive nodes; if none is active the
/// node under the cursor is returned anyway. The cursor then moves to the
/// position after the returned node.
pub struct RoundRobinLocator {
    nodes: ArcSwap<Vec<NodeHandle>>,
    cursor: Mutex<usize>,
    read_only: bool,
}

impl RoundRobinLocator {
    /// Creates a locator over `nodes`, which must not be empty.
    pub fn new(nodes: Vec<NodeHandle>) -> MemcachedResult<Self> {
        check_not_empty(&nodes)?;
        Ok(Self {
            nodes: ArcSwap::from_pointee(nodes),
            cursor: Mutex::new(0),
            read_only: false,
        })
    }

    /// Number of nodes in the current set.
    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    /// Always false: a locator holds at least one node.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn cursor(&self) -> MutexGuard<'_, usize> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn check_not_empty(nodes: &[NodeHandle]) -> MemcachedResult<()> {
    if nodes.is_empty() {
        return Err(MemcachedError::from((
            ErrorKind::InvalidClientConfig,
            "A locator needs at least one node",
        )));
    }
    Ok(())
}

impl NodeLocator for RoundRobinLocator {
    fn primary(&self, _key: &str) -> NodeHandle {
        let mut cursor = self.cursor();
        let nodes = self.nodes.load();
        let len = nodes.len();
        let start = *cursor % len;

        let index = match (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| nodes[i].is_active())
        {
            Some(index) => index,
            None => {
                warn!("No active node among {len}, falling back to {}", nodes[start].address());
                start
            }
        };

        *cursor = (index + 1) % len;
        trace!("Routed to node {} ({index})", nodes[index].address());
        nodes[index].clone()
    }

    fn sequence(&self, _key: &str) -> NodeSequence {
        let cursor = self.cursor();
        let nodes = self.nodes.load_full();
        let len = nodes.len();
        // The cursor sits right after the last primary.
        let last_primary = (*cursor % len + len - 1) % len;
        NodeSequence::new(nodes, last_primary)
    }

    fn all(&self) -> Vec<NodeHandle> {
        self.nodes.load().as_ref().clone()
    }

    fn readonly_copy(&self) -> Box<dyn NodeLocator> {
        let cursor = *self.cursor();
        let nodes = self
            .nodes
            .load()
            .iter()
            .map(|node| {
                if node.is_read_only() {
                    node.clone()
                } else {
                    ReadonlyNode::handle(node.clone())
                }
            })
            .collect();
        Box::new(RoundRobinLocator {
            nodes: ArcSwap::from_pointee(nodes),
            cursor: Mutex::new(cursor),
            read_only: true,
        })
    }

    fn update_locator(&self, nodes: Vec<NodeHandle>) -> MemcachedResult<()> {
        if self.read_only {
            return Err(MemcachedError::from((
                ErrorKind::ReadOnlyNode,
                "Cannot update a read-only locator",
            )));
        }
        check_not_empty(&nodes)?;
        trace!("Replacing {} node(s) with {}", self.len(), nodes.len());
        self.nodes.store(Arc::new(nodes));
        Ok(())
    }
}
