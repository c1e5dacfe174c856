//! Retry policy engine: failure classification, exponential backoff with
//! mandatory jitter, attempt caps, and cancellation-aware sleeps.

mod classifier;
mod engine;
mod policy;

pub use classifier::{FailureClassifier, MatchRule, Verdict};
pub use engine::{AttemptOutcome, RetryEngine, RetryError};
pub use policy::{MAX_ATTEMPTS_CEILING, MULTIPLIER_RANGE, PolicyError, RetryPolicy};
