//! Backend nodes as seen by routing and by the operation lifecycle.
//!
//! The connection layer owns the sockets; this module only describes what the
//! locator and the operation state machine need from a node: its address, its
//! liveness and its FIFO input queue.

use std::collections::VecDeque;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arcstr::ArcStr;
use log::trace;

use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::ops::{OperationRef, OperationState};

/// Shared, non-owning handle to a node. Identity is pointer identity.
pub type NodeHandle = Arc<dyn Node>;

/// Address of a backend server as configured, before any DNS resolution.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeAddr {
    host: ArcStr,
    port: u16,
}

impl NodeAddr {
    /// Creates a new address from a host name (or literal IP) and a port.
    pub fn new(host: impl Into<ArcStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The configured host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the host to an IP address.
    ///
    /// Resolution only happens when this is called; the configured host name is
    /// kept as-is otherwise.
    pub fn resolve(&self) -> MemcachedResult<SocketAddr> {
        let mut addrs = (self.host.as_str(), self.port).to_socket_addrs()?;
        addrs.next().ok_or_else(|| {
            MemcachedError::from((
                ErrorKind::InvalidClientConfig,
                "Host did not resolve to any address",
                self.to_string(),
            ))
        })
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for NodeAddr {
    fn from(addr: SocketAddr) -> Self {
        NodeAddr::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for NodeAddr {
    type Err = MemcachedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            MemcachedError::from((
                ErrorKind::InvalidClientConfig,
                "Invalid node address",
                s.to_string(),
            ))
        };
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(NodeAddr::new(host, port))
    }
}

/// What the routing and lifecycle core needs from a backend connection.
pub trait Node: Send + Sync + fmt::Debug {
    /// The configured address of the node.
    fn address(&self) -> &NodeAddr;

    /// Whether the node's connection is currently healthy.
    fn is_active(&self) -> bool;

    /// Flips the liveness flag after a health check.
    fn set_active(&self, active: bool) -> MemcachedResult<()>;

    /// Appends an operation to the input queue, moving it to `WriteQueued`.
    fn add_op(&self, op: OperationRef) -> MemcachedResult<()>;

    /// Pops the oldest queued operation, if any.
    fn take_op(&self) -> MemcachedResult<Option<OperationRef>>;

    /// Number of operations waiting in the input queue.
    fn queue_len(&self) -> usize;

    /// Returns true for views that reject every mutation.
    fn is_read_only(&self) -> bool {
        false
    }
}

/// Records `node` as the handling node of `op` and queues it there.
pub fn enqueue(node: &NodeHandle, op: OperationRef) -> MemcachedResult<()> {
    op.set_handling_node(node.clone());
    node.add_op(op)
}

/// A node backed by an in-process FIFO queue.
pub struct MemcachedNode {
    addr: NodeAddr,
    active: AtomicBool,
    input_queue: Mutex<VecDeque<OperationRef>>,
}

impl MemcachedNode {
    /// Creates an active node for a freshly established connection.
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            active: AtomicBool::new(true),
            input_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates a node and wraps it in a [`NodeHandle`].
    pub fn handle(addr: NodeAddr) -> NodeHandle {
        Arc::new(Self::new(addr))
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<OperationRef>> {
        self.input_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for MemcachedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{MemcachedNode to {} active: {}, #Rops: {}}}",
            self.addr,
            self.is_active(),
            self.queue_len()
        )
    }
}

impl Node for MemcachedNode {
    fn address(&self) -> &NodeAddr {
        &self.addr
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) -> MemcachedResult<()> {
        let was = self.active.swap(active, Ordering::AcqRel);
        if was != active {
            trace!("Node {} is now {}", self.addr, if active { "active" } else { "inactive" });
        }
        Ok(())
    }

    fn add_op(&self, op: OperationRef) -> MemcachedResult<()> {
        op.transition_state(OperationState::WriteQueued)?;
        self.queue().push_back(op);
        Ok(())
    }

    fn take_op(&self) -> MemcachedResult<Option<OperationRef>> {
        Ok(self.queue().pop_front())
    }

    fn queue_len(&self) -> usize {
        self.queue().len()
    }
}

/// Read-only view of a node: inspection is forwarded, mutation is rejected.
pub struct ReadonlyNode {
    root: NodeHandle,
}

impl ReadonlyNode {
    /// Wraps `root` in a read-only view.
    pub fn new(root: NodeHandle) -> Self {
        Self { root }
    }

    /// Wraps `root` and returns the view as a [`NodeHandle`].
    pub fn handle(root: NodeHandle) -> NodeHandle {
        Arc::new(Self::new(root))
    }

    fn rejected<T>(&self, what: &'static str) -> MemcachedResult<T> {
        Err(MemcachedError::from((
            ErrorKind::ReadOnlyNode,
            what,
            self.root.address().to_string(),
        )))
    }
}

impl fmt::Debug for ReadonlyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.root, f)
    }
}

impl Node for ReadonlyNode {
    fn address(&self) -> &NodeAddr {
        self.root.address()
    }

    fn is_active(&self) -> bool {
        self.root.is_active()
    }

    fn set_active(&self, _active: bool) -> MemcachedResult<()> {
        self.rejected("Cannot change liveness of a read-only node")
    }

    fn add_op(&self, _op: OperationRef) -> MemcachedResult<()> {
        self.rejected("Cannot queue operations on a read-only node")
    }

    fn take_op(&self) -> MemcachedResult<Option<OperationRef>> {
        self.rejected("Cannot drain a read-only node")
    }

    fn queue_len(&self) -> usize {
        self.root.queue_len()
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_addresses() {
        let addr: NodeAddr = "cache-1.local:11211".parse().unwrap();
        assert_eq!(addr.host(), "cache-1.local");
        assert_eq!(addr.port(), 11211);
        assert_eq!(addr.to_string(), "cache-1.local:11211");

        let v6: NodeAddr = "[::1]:11211".parse().unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:11211");

        assert!("no-port".parse::<NodeAddr>().is_err());
        assert!(":11211".parse::<NodeAddr>().is_err());
        assert!("host:port".parse::<NodeAddr>().is_err());
    }

    #[test]
    fn resolving_an_ip_literal_keeps_the_address() {
        let addr = NodeAddr::new("127.0.0.1", 11211);
        let resolved = addr.resolve().unwrap();
        assert_eq!(resolved, "127.0.0.1:11211".parse::<SocketAddr>().unwrap());
        assert_eq!(NodeAddr::from(resolved), addr);
    }

    #[test]
    fn readonly_view_forwards_inspection_and_rejects_mutation() {
        let root = MemcachedNode::handle(NodeAddr::new("10.0.0.1", 11211));
        let view = ReadonlyNode::handle(root.clone());

        assert_eq!(view.address(), root.address());
        assert!(view.is_active());
        assert!(view.is_read_only());
        assert_eq!(format!("{view:?}"), format!("{root:?}"));

        root.set_active(false).unwrap();
        assert!(!view.is_active());

        let err = view.set_active(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyNode);
        assert!(!root.is_active());
        assert_eq!(view.take_op().unwrap_err().kind(), ErrorKind::ReadOnlyNode);
    }
}
