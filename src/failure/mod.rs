//! Failure taxonomy and the failure handler.
//!
//! Leaf operations surface structured [`ErrorRecord`]s; the runner wraps
//! terminal ones into [`FailureEvent`]s and routes them through the
//! [`FailureHandler`], which integrates retry classification, abort
//! accounting, and caller-registered per-category handlers into one
//! [`RecoveryDecision`].

mod event;
mod handler;
mod record;

pub use event::{
    FailureCategory, FailureEvent, RecoveryAction, RecoveryDecision, Severity,
};
pub use handler::{CategoryHandler, FailureContext, FailureHandler};
pub use record::ErrorRecord;
