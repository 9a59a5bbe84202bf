use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{error, trace, warn};

use crate::errors::{ErrorKind, MemcachedError, MemcachedResult};
use crate::node::NodeHandle;
use crate::observer::StateChangeObserver;

use super::callback::{CallbackRef, OperationStatus};
use super::command::Command;
use super::state::OperationState;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared reference to an operation. Nodes, the dispatcher and the caller all
/// hold the same instance.
pub type OperationRef = Arc<Operation>;

/// A single command together with its lifecycle state.
///
/// Transitions are serialized per operation; the current state can be read
/// from any thread without taking a lock.
pub struct Operation {
    id: u64,
    command: Command,
    callback: CallbackRef,
    state: AtomicU8,
    // Guards the time the current state was entered and serializes transitions.
    entered_at: Mutex<Instant>,
    cancelled: AtomicBool,
    error: Mutex<Option<MemcachedError>>,
    handling_node: Mutex<Option<NodeHandle>>,
    not_my_vbucket_nodes: Mutex<Vec<NodeHandle>>,
    retries: AtomicU32,
    observers: Vec<Arc<dyn StateChangeObserver>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Operation {
    pub(crate) fn new(
        command: Command,
        callback: CallbackRef,
        observers: Vec<Arc<dyn StateChangeObserver>>,
    ) -> Self {
        Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            command,
            callback,
            state: AtomicU8::new(OperationState::Queued.as_u8()),
            entered_at: Mutex::new(Instant::now()),
            cancelled: AtomicBool::new(false),
            error: Mutex::new(None),
            handling_node: Mutex::new(None),
            not_my_vbucket_nodes: Mutex::new(Vec::new()),
            retries: AtomicU32::new(0),
            observers,
        }
    }

    /// Process-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The command and its parameters.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The keys this operation addresses.
    pub fn keys(&self) -> &[String] {
        self.command.keys()
    }

    /// The callback results are delivered to.
    pub fn callback(&self) -> &CallbackRef {
        &self.callback
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once the operation reached `Complete`, `Cancelled` or `Error`.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if cancellation was requested, whether or not it has been
    /// observed by the I/O driver yet.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true if the operation failed with a non-retryable error.
    pub fn has_errored(&self) -> bool {
        lock(&self.error).is_some()
    }

    /// The error the operation failed with, if any.
    pub fn error(&self) -> Option<MemcachedError> {
        lock(&self.error)
            .as_ref()
            .map(|err| err.clone_mostly("operation failed"))
    }

    /// The node the operation was last queued on.
    pub fn handling_node(&self) -> Option<NodeHandle> {
        lock(&self.handling_node).clone()
    }

    pub(crate) fn set_handling_node(&self, node: NodeHandle) {
        *lock(&self.handling_node) = Some(node);
    }

    /// Nodes that rejected this operation because they do not own its vbucket.
    pub fn not_my_vbucket_nodes(&self) -> Vec<NodeHandle> {
        lock(&self.not_my_vbucket_nodes).clone()
    }

    /// Records a not-my-vbucket rejection from `node`.
    ///
    /// Ignored for commands that are not vbucket aware.
    pub fn add_not_my_vbucket_node(&self, node: NodeHandle) {
        if !self.command.is_vbucket_aware() {
            return;
        }
        let mut nodes = lock(&self.not_my_vbucket_nodes);
        if !nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
            nodes.push(node);
        }
    }

    pub(crate) fn set_not_my_vbucket_nodes(&self, nodes: Vec<NodeHandle>) {
        if self.command.is_vbucket_aware() {
            *lock(&self.not_my_vbucket_nodes) = nodes;
        }
    }

    /// How many times this operation's lineage has been cloned for retry.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub(crate) fn set_retries(&self, retries: u32) {
        self.retries.store(retries, Ordering::Relaxed);
    }

    /// Moves the operation along a non-terminal edge of the state graph.
    ///
    /// Terminal states are reached through [`finish`](Self::finish),
    /// [`fail`](Self::fail) and [`check_cancelled`](Self::check_cancelled) so
    /// the callback always fires.
    pub fn transition_state(&self, next: OperationState) -> MemcachedResult<()> {
        if next.is_terminal() {
            return Err(MemcachedError::from((
                ErrorKind::InvalidStateTransition,
                "Terminal states must be reached through finish, fail or cancellation",
                format!("{} -> {}", self.state(), next),
            )));
        }
        self.transition(next)
    }

    /// Marks the operation for cancellation.
    ///
    /// Operations not yet handed to a node are cancelled immediately; queued or
    /// in-flight ones are cancelled by the I/O driver at its next step. Returns
    /// false if the operation already reached a terminal state.
    pub fn cancel(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        if self.state() == OperationState::Queued {
            // Nothing drives an operation that was never queued.
            if let Err(err) = self.check_cancelled() {
                // Lost a race with enqueue, the driver finishes the cancellation.
                trace!("Deferring cancellation of operation {}: {err}", self.id);
            }
        }
        true
    }

    /// Completes a requested cancellation.
    ///
    /// Returns `Ok(true)` if the operation is (now) cancelled, in which case
    /// the caller must not proceed with it.
    pub fn check_cancelled(&self) -> MemcachedResult<bool> {
        if !self.is_cancelled() {
            return Ok(false);
        }
        match self.state() {
            OperationState::Cancelled => Ok(true),
            state if state.is_terminal() => Ok(false),
            _ => {
                self.transition(OperationState::Cancelled)?;
                self.notify_callback(&OperationStatus::cancelled());
                Ok(true)
            }
        }
    }

    /// Moves the operation to `Complete` and reports `status`.
    pub fn finish(&self, status: OperationStatus) -> MemcachedResult<()> {
        self.transition(OperationState::Complete)?;
        self.notify_callback(&status);
        Ok(())
    }

    /// Moves the operation to `Error` and reports `err`.
    pub fn fail(&self, err: MemcachedError) -> MemcachedResult<()> {
        let status = OperationStatus::failed(err.to_string());
        self.transition(OperationState::Error)?;
        *lock(&self.error) = Some(err);
        self.notify_callback(&status);
        Ok(())
    }

    /// Ends the operation after `err` left it unusable, so the callback still
    /// fires.
    ///
    /// Fails the operation when its state allows it and cancels it otherwise.
    /// Operations already in a terminal state are left alone.
    pub(crate) fn abandon(&self, err: MemcachedError) {
        let state = self.state();
        if state.is_terminal() {
            return;
        }
        let result = if state.can_transition_to(OperationState::Error) {
            self.fail(err)
        } else {
            warn!("Cancelling operation {} in state {state}: {err}", self.id);
            self.cancelled.store(true, Ordering::Release);
            self.check_cancelled().map(|_| ())
        };
        if let Err(err) = result {
            warn!("Could not abandon operation {}: {err}", self.id);
        }
    }

    /// Moves the operation to `Retry`, recording `rejected_by` as a node that
    /// does not own the operation's vbucket.
    pub fn retry(&self, rejected_by: Option<NodeHandle>) -> MemcachedResult<()> {
        if let Some(node) = rejected_by {
            self.add_not_my_vbucket_node(node);
        }
        self.transition(OperationState::Retry)
    }

    fn transition(&self, next: OperationState) -> MemcachedResult<()> {
        let (prev, elapsed) = {
            let mut entered_at = lock(&self.entered_at);
            let prev = self.state();
            if !prev.can_transition_to(next) {
                if prev.is_terminal() {
                    error!("Operation {} attempted to leave terminal state {prev}", self.id);
                }
                return Err(MemcachedError::from((
                    ErrorKind::InvalidStateTransition,
                    "Illegal operation state transition",
                    format!("{prev} -> {next}"),
                )));
            }
            let now = Instant::now();
            let elapsed = now.duration_since(*entered_at);
            *entered_at = now;
            self.state.store(next.as_u8(), Ordering::Release);
            (prev, elapsed)
        };
        trace!("Operation {} ({}) {prev} -> {next}", self.id, self.command.name());
        for observer in &self.observers {
            observer.state_changed(self, prev, next, elapsed);
        }
        Ok(())
    }

    fn notify_callback(&self, status: &OperationStatus) {
        self.callback.received_status(status);
        self.callback.complete();
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cmd: {} Id: {} Keys: {} State: {}",
            self.command.name(),
            self.id,
            self.keys().join(" "),
            self.state()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::ops::OperationCallback;

    #[derive(Default)]
    struct CountingCallback {
        statuses: Mutex<Vec<OperationStatus>>,
        completions: AtomicUsize,
    }

    impl OperationCallback for CountingCallback {
        fn received_status(&self, status: &OperationStatus) {
            self.statuses.lock().unwrap().push(status.clone());
        }

        fn complete(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct TransitionLog(Mutex<Vec<(OperationState, OperationState)>>);

    impl StateChangeObserver for TransitionLog {
        fn state_changed(
            &self,
            _op: &Operation,
            prev: OperationState,
            current: OperationState,
            _elapsed: Duration,
        ) {
            self.0.lock().unwrap().push((prev, current));
        }
    }

    fn operation(command: Command) -> (Operation, Arc<CountingCallback>, Arc<TransitionLog>) {
        let callback = Arc::new(CountingCallback::default());
        let log = Arc::new(TransitionLog::default());
        let op = Operation::new(command, callback.clone(), vec![log.clone()]);
        (op, callback, log)
    }

    fn get(key: &str) -> Command {
        Command::Get {
            keys: vec![key.to_string()],
        }
    }

    #[test]
    fn full_lifecycle_notifies_observer_and_callback_once() {
        let (op, callback, log) = operation(get("a"));
        op.transition_state(OperationState::WriteQueued).unwrap();
        op.transition_state(OperationState::Writing).unwrap();
        op.transition_state(OperationState::Reading).unwrap();
        op.finish(OperationStatus::ok()).unwrap();

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                (OperationState::Queued, OperationState::WriteQueued),
                (OperationState::WriteQueued, OperationState::Writing),
                (OperationState::Writing, OperationState::Reading),
                (OperationState::Reading, OperationState::Complete),
            ]
        );
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
        assert_eq!(*callback.statuses.lock().unwrap(), vec![OperationStatus::ok()]);
    }

    #[test]
    fn terminal_states_are_final() {
        let (op, callback, _) = operation(get("a"));
        op.transition_state(OperationState::WriteQueued).unwrap();
        op.transition_state(OperationState::Writing).unwrap();
        op.transition_state(OperationState::Reading).unwrap();
        op.finish(OperationStatus::ok()).unwrap();

        let err = op.transition_state(OperationState::WriteQueued).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        let err = op.finish(OperationStatus::ok()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        assert!(!op.cancel());
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transition_state_rejects_terminal_targets() {
        let (op, _, _) = operation(get("a"));
        let err = op.transition_state(OperationState::Cancelled).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        assert_eq!(op.state(), OperationState::Queued);
    }

    #[test]
    fn cancelling_an_unqueued_operation_is_immediate() {
        let (op, callback, _) = operation(get("a"));
        assert!(op.cancel());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(
            *callback.statuses.lock().unwrap(),
            vec![OperationStatus::cancelled()]
        );
    }

    #[test]
    fn cancelling_a_queued_operation_waits_for_the_driver() {
        let (op, callback, _) = operation(get("a"));
        op.transition_state(OperationState::WriteQueued).unwrap();
        assert!(op.cancel());
        assert!(op.is_cancelled());
        assert_eq!(op.state(), OperationState::WriteQueued);
        assert_eq!(callback.completions.load(Ordering::SeqCst), 0);

        assert!(op.check_cancelled().unwrap());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert!(op.check_cancelled().unwrap());
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fail_records_the_error() {
        let (op, callback, _) = operation(get("a"));
        op.transition_state(OperationState::WriteQueued).unwrap();
        op.transition_state(OperationState::Writing).unwrap();
        op.fail(MemcachedError::from((ErrorKind::ServerError, "out of memory")))
            .unwrap();

        assert!(op.has_errored());
        assert_eq!(op.error().unwrap().kind(), ErrorKind::ServerError);
        assert_eq!(op.state(), OperationState::Error);
        let statuses = callback.statuses.lock().unwrap();
        assert!(!statuses[0].is_success());
    }

    #[test]
    fn abandon_fails_in_flight_operations() {
        let (op, callback, _) = operation(get("a"));
        op.transition_state(OperationState::WriteQueued).unwrap();
        op.transition_state(OperationState::Writing).unwrap();
        op.abandon(MemcachedError::from((ErrorKind::ClientError, "bad frame")));

        assert_eq!(op.state(), OperationState::Error);
        assert_eq!(op.error().unwrap().kind(), ErrorKind::ClientError);
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abandon_cancels_when_error_is_unreachable() {
        let (op, callback, _) = operation(get("a"));
        op.abandon(MemcachedError::from((ErrorKind::ReadOnlyNode, "read-only")));

        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(
            *callback.statuses.lock().unwrap(),
            vec![OperationStatus::cancelled()]
        );

        op.abandon(MemcachedError::from((ErrorKind::IoError, "again")));
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vbucket_history_only_for_keyed_commands() {
        let node = crate::node::MemcachedNode::handle(crate::node::NodeAddr::new("n", 1));

        let (op, _, _) = operation(get("a"));
        op.add_not_my_vbucket_node(node.clone());
        op.add_not_my_vbucket_node(node.clone());
        assert_eq!(op.not_my_vbucket_nodes().len(), 1);

        let (noop, _, _) = operation(Command::Noop);
        noop.add_not_my_vbucket_node(node);
        assert!(noop.not_my_vbucket_nodes().is_empty());
    }
}
