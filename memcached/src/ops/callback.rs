use std::fmt;
use std::sync::Arc;

use crate::node::NodeAddr;

/// Outcome reported to an operation's callback.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OperationStatus {
    success: bool,
    message: String,
}

impl OperationStatus {
    /// Creates a status.
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }

    /// A successful status with the conventional `OK` message.
    pub fn ok() -> Self {
        Self::new(true, "OK")
    }

    /// A failed status carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    /// The status reported for operations that were cancelled.
    pub fn cancelled() -> Self {
        Self::new(false, "cancelled")
    }

    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Server or client supplied description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{OperationStatus success={}:  {}}}", self.success, self.message)
    }
}

/// Receives the results of an operation.
///
/// Callbacks run on whichever thread drives the node's I/O, never necessarily
/// the thread that issued the operation. The data hooks have empty default
/// implementations so each callback only overrides what its command produces.
pub trait OperationCallback: Send + Sync {
    /// The final status of the operation. Called once, right before [`complete`](Self::complete).
    fn received_status(&self, status: &OperationStatus);

    /// The operation reached a terminal state.
    fn complete(&self);

    /// A value was retrieved by a get-family command.
    fn got_data(&self, _key: &str, _flags: u32, _cas: Option<u64>, _data: &[u8]) {}

    /// A store, delete or mutation produced a new CAS token.
    fn got_cas(&self, _key: &str, _cas: u64) {}

    /// A statistic was returned by a stats command.
    fn got_stat(&self, _name: &str, _value: &str) {}

    /// A node reported the persistence state of a key.
    fn got_observation(&self, _key: &str, _cas: u64, _node: &NodeAddr, _persisted: bool) {}
}

/// Shared callback reference. Clones of an operation keep the same reference.
pub type CallbackRef = Arc<dyn OperationCallback>;
