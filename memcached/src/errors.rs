use std::{error, fmt, io};

use arcstr::ArcStr;

/// An enum of all error kinds.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An error that was caused because the parameters given to the
    /// client were wrong.
    InvalidClientConfig,
    /// This kind is returned if the error is one that is not native to the
    /// system. This is usually the case if the cause is an I/O error.
    IoError,
    /// An error raised that was identified on the client before execution.
    ClientError,
    /// The contacted node does not own the partition of the requested key.
    NotMyVbucket,
    /// The node the operation was routed to is not currently active.
    NodeInactive,
    /// The operation was cancelled by the caller or by the system.
    Cancelled,
    /// A failure reported by the server that cannot be retried.
    ServerError,
    /// A mutation was attempted through a read-only node view.
    ReadOnlyNode,
    /// A state transition that is not an edge of the operation state graph.
    InvalidStateTransition,
    /// An internal invariant was broken by the caller, such as cloning an
    /// operation that is not in a cloneable state.
    ContractViolation,
    /// The operation was retried more often than the dispatch configuration allows.
    RetriesExhausted,
}

/// Represents a memcached client error.
///
/// For the most part you should be using the Error trait to interact with this
/// rather than the actual struct.
pub struct MemcachedError {
    repr: ErrorRepr,
}

#[derive(Debug)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, ArcStr),
    IoError(io::Error),
}

impl PartialEq for MemcachedError {
    fn eq(&self, other: &MemcachedError) -> bool {
        match (&self.repr, &other.repr) {
            (&ErrorRepr::WithDescription(kind_a, _), &ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                &ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                &ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            _ => false,
        }
    }
}

impl From<io::Error> for MemcachedError {
    fn from(err: io::Error) -> MemcachedError {
        MemcachedError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MemcachedError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MemcachedError {
        MemcachedError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for MemcachedError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> MemcachedError {
        MemcachedError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail.into()),
        }
    }
}

impl error::Error for MemcachedError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for MemcachedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MemcachedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                f.write_str(desc)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, detail) => {
                f.write_str(desc)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                f.write_str(detail)
            }
            ErrorRepr::IoError(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl MemcachedError {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => *kind,
            ErrorRepr::IoError(_) => ErrorKind::IoError,
        }
    }

    /// Returns the error detail.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, detail) => Some(detail.as_str()),
            _ => None,
        }
    }

    /// Returns the name of the error category for display purposes.
    pub fn category(&self) -> &str {
        match self.kind() {
            ErrorKind::InvalidClientConfig => "invalid client config",
            ErrorKind::IoError => "I/O error",
            ErrorKind::ClientError => "client error",
            ErrorKind::NotMyVbucket => "not my vbucket",
            ErrorKind::NodeInactive => "node inactive",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ServerError => "server error",
            ErrorKind::ReadOnlyNode => "read-only node",
            ErrorKind::InvalidStateTransition => "invalid state transition",
            ErrorKind::ContractViolation => "contract violation",
            ErrorKind::RetriesExhausted => "retries exhausted",
        }
    }

    /// Indicates that this failure is an IO failure.
    pub fn is_io_error(&self) -> bool {
        self.kind() == ErrorKind::IoError
    }

    /// Returns true if the operation that produced this error can be cloned and
    /// re-dispatched, possibly to a different node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::IoError | ErrorKind::NotMyVbucket | ErrorKind::NodeInactive
        )
    }

    /// Returns true if the error reports a broken internal invariant rather
    /// than a cluster condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ContractViolation
                | ErrorKind::InvalidStateTransition
                | ErrorKind::ReadOnlyNode
        )
    }

    /// Clone the `MemcachedError`, throwing away non-cloneable parts of an `IoError`.
    ///
    /// Deriving `Clone` is not possible because the wrapped `io::Error` is not
    /// cloneable.
    pub(crate) fn clone_mostly(&self, ioerror_description: &'static str) -> Self {
        let repr = match &self.repr {
            ErrorRepr::WithDescription(kind, desc) => ErrorRepr::WithDescription(*kind, desc),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, detail) => {
                ErrorRepr::WithDescriptionAndDetail(*kind, desc, detail.clone())
            }
            ErrorRepr::IoError(err) => ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                ioerror_description,
                err.to_string().into(),
            ),
        };
        Self { repr }
    }
}

/// Library generic result type.
pub type MemcachedResult<T> = Result<T, MemcachedError>;
