//! Operations: commands, their lifecycle state machine and their callbacks.

mod callback;
mod command;
mod operation;
mod state;

pub use callback::{CallbackRef, OperationCallback, OperationStatus};
pub use command::{
    CloneRule, Command, ConcatenationType, Mutator, SaslParams, StoreType, TapOpcode, TapRequest,
};
pub use operation::{Operation, OperationRef};
pub use state::OperationState;
