use std::fmt;

/// Lifecycle state of an operation.
///
/// `Queued` and `WriteQueued` together form the queued phase: an operation is
/// `Queued` when the factory hands it out and becomes `WriteQueued` once it
/// sits on a node's input queue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum OperationState {
    /// Created, not yet placed on a node.
    Queued = 0,
    /// Waiting in a node's input queue for transmission.
    WriteQueued = 1,
    /// Request bytes are being sent.
    Writing = 2,
    /// Request sent, awaiting the response.
    Reading = 3,
    /// Terminal success.
    Complete = 4,
    /// Transient failure or topology mismatch; eligible for cloning.
    Retry = 5,
    /// Terminal, aborted by the caller or by the system.
    Cancelled = 6,
    /// Terminal, non-retryable failure.
    Error = 7,
}

impl OperationState {
    /// Every state, in declaration order.
    pub const ALL: [OperationState; 8] = [
        OperationState::Queued,
        OperationState::WriteQueued,
        OperationState::Writing,
        OperationState::Reading,
        OperationState::Complete,
        OperationState::Retry,
        OperationState::Cancelled,
        OperationState::Error,
    ];

    /// Returns true if no further transition may leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Complete | OperationState::Cancelled | OperationState::Error
        )
    }

    /// Returns true if an operation in this state may be cloned.
    pub fn is_cloneable(self) -> bool {
        matches!(self, OperationState::WriteQueued | OperationState::Retry)
    }

    /// Returns true if `self -> next` is an edge of the state graph.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Queued, WriteQueued)
                | (Queued, Cancelled)
                | (WriteQueued, Writing)
                | (WriteQueued, Retry)
                | (WriteQueued, Cancelled)
                | (Writing, Reading)
                | (Writing, Retry)
                | (Writing, Cancelled)
                | (Writing, Error)
                | (Reading, Complete)
                | (Reading, Retry)
                | (Reading, Cancelled)
                | (Reading, Error)
                | (Retry, WriteQueued)
                | (Retry, Cancelled)
                | (Retry, Error)
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        // Only values produced by `as_u8` are ever stored.
        Self::ALL[value as usize]
    }

    /// Upper-case name used in metric names and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Queued => "QUEUED",
            OperationState::WriteQueued => "WRITE_QUEUED",
            OperationState::Writing => "WRITING",
            OperationState::Reading => "READING",
            OperationState::Complete => "COMPLETE",
            OperationState::Retry => "RETRY",
            OperationState::Cancelled => "CANCELLED",
            OperationState::Error => "ERROR",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::OperationState::{self, *};

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in OperationState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in OperationState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn happy_path_is_allowed() {
        let path = [Queued, WriteQueued, Writing, Reading, Complete];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[test]
    fn only_write_queued_and_retry_are_cloneable() {
        let cloneable: Vec<_> = OperationState::ALL
            .into_iter()
            .filter(|s| s.is_cloneable())
            .collect();
        assert_eq!(cloneable, vec![WriteQueued, Retry]);
    }

    #[test]
    fn u8_round_trip() {
        for state in OperationState::ALL {
            assert_eq!(OperationState::from_u8(state.as_u8()), state);
        }
    }
}
