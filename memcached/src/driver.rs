//! Draining a node's input queue through a wire transport.

use log::{debug, trace, warn};

use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::node::{Node, NodeHandle};
use crate::ops::{Operation, OperationRef, OperationState, OperationStatus};

/// What the server answered for one operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A final status for the operation.
    Status(OperationStatus),
    /// The node does not own the vbucket of the operation's key.
    NotMyVbucket,
}

/// Socket and protocol seam used by [`NodeDriver`].
///
/// Implementations encode the operation's command on `transmit` and decode the
/// matching response on `receive`, delivering any data to the operation's
/// callback before returning the final reply.
pub trait Transport {
    /// Writes the request for `op`.
    fn transmit(&mut self, op: &Operation) -> MemcachedResult<()>;

    /// Reads the response for `op`.
    fn receive(&mut self, op: &Operation) -> MemcachedResult<Reply>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, op: &Operation) -> MemcachedResult<()> {
        (**self).transmit(op)
    }

    fn receive(&mut self, op: &Operation) -> MemcachedResult<Reply> {
        (**self).receive(op)
    }
}

/// Moves the operations queued on one node through the write and read phases.
pub struct NodeDriver<T> {
    node: NodeHandle,
    transport: T,
}

enum Outcome {
    Done,
    Retry,
}

impl<T: Transport> NodeDriver<T> {
    /// Creates a driver for `node` talking through `transport`.
    pub fn new(node: NodeHandle, transport: T) -> Self {
        Self { node, transport }
    }

    /// The node being drained.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Gets the transport back.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Processes every operation currently queued on the node.
    ///
    /// Cancellation is honored before writing and before reading. Operations
    /// the node could not serve are left in `Retry` and returned so they can
    /// be redistributed. An operation that cannot be moved along its lifecycle
    /// is failed, or cancelled when failing is not possible from its state.
    pub fn drive(&mut self) -> MemcachedResult<Vec<OperationRef>> {
        let mut retries = Vec::new();
        while let Some(op) = self.node.take_op()? {
            match self.process(&op) {
                Ok(Outcome::Retry) => retries.push(op),
                Ok(Outcome::Done) => {}
                Err(err) => {
                    warn!("Abandoning operation {op:?} on {}: {err}", self.node.address());
                    op.abandon(err);
                }
            }
        }
        if !retries.is_empty() {
            debug!(
                "{} operation(s) on {} need to be retried",
                retries.len(),
                self.node.address()
            );
        }
        Ok(retries)
    }

    fn process(&mut self, op: &Operation) -> MemcachedResult<Outcome> {
        if op.check_cancelled()? {
            return Ok(Outcome::Done);
        }
        op.transition_state(OperationState::Writing)?;
        if let Err(err) = self.transport.transmit(op) {
            return self.handle_error(op, err);
        }

        if op.check_cancelled()? {
            return Ok(Outcome::Done);
        }
        op.transition_state(OperationState::Reading)?;
        match self.transport.receive(op) {
            Ok(Reply::Status(status)) => {
                op.finish(status)?;
                Ok(Outcome::Done)
            }
            Ok(Reply::NotMyVbucket) => {
                trace!("{} does not own the vbucket of {op:?}", self.node.address());
                op.retry(Some(self.node.clone()))?;
                Ok(Outcome::Retry)
            }
            Err(err) => self.handle_error(op, err),
        }
    }

    fn handle_error(&self, op: &Operation, err: MemcachedError) -> MemcachedResult<Outcome> {
        if err.is_retryable() {
            debug!("Retrying {op:?} after {err}");
            let rejected_by = (err.kind() == ErrorKind::NotMyVbucket).then(|| self.node.clone());
            op.retry(rejected_by)?;
            Ok(Outcome::Retry)
        } else {
            op.fail(err)?;
            Ok(Outcome::Done)
        }
    }
}
