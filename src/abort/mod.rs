//! Abort controller: sliding-window failure analysis and the ordered abort
//! sequence (save state, cleanup, notify, log, shutdown).

mod controller;
mod policy;
mod window;

pub use controller::{
    AbortController, AbortEffects, AbortEvaluation, AbortReason, NoopEffects,
};
pub use policy::{AbortAction, AbortPolicy, AbortPolicyError, AbortStep};
pub use window::{OperationOutcome, OutcomeWindow};
