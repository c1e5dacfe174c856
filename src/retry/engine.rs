use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use miette::Diagnostic;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::classifier::Verdict;
use super::policy::RetryPolicy;
use crate::event_bus::{Event, EventEmitter, ItemOutcome};
use crate::failure::ErrorRecord;

/// What happened on one failed attempt, kept for post-mortems when a retry
/// budget runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub error: ErrorRecord,
    pub verdict: Verdict,
    /// Backoff slept after this attempt, `None` on the final one.
    pub delay: Option<Duration>,
}

/// Terminal outcomes of [`RetryEngine::execute`].
#[derive(Debug, Error, Diagnostic)]
pub enum RetryError {
    /// The classifier ruled the failure permanent; no further attempts were
    /// made.
    #[error("permanent failure on attempt {attempt}: {record}")]
    #[diagnostic(code(crawlweave::retry::permanent))]
    Permanent { attempt: u32, record: ErrorRecord },

    /// Every attempt failed with a transient error.
    #[error("retries exhausted after {} attempts: {last}", attempts.len())]
    #[diagnostic(
        code(crawlweave::retry::exhausted),
        help("the last error and every attempt outcome are attached for diagnosis")
    )]
    MaxRetriesExceeded {
        attempts: Vec<AttemptOutcome>,
        last: ErrorRecord,
    },

    /// The caller's cancellation token fired during backoff or between
    /// attempts.
    #[error("cancelled during attempt {attempt}")]
    #[diagnostic(code(crawlweave::retry::cancelled))]
    Cancelled { attempt: u32 },
}

/// Stateless executor of retry policies.
///
/// The engine holds no per-call state and may be invoked concurrently. It
/// optionally carries an emitter so every retry shows up on the event bus.
///
/// # Examples
///
/// ```no_run
/// use crawlweave::retry::{RetryEngine, RetryPolicy};
/// use crawlweave::failure::ErrorRecord;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = RetryEngine::new();
/// let cancel = CancellationToken::new();
/// let value = engine
///     .execute(&RetryPolicy::standard(), &cancel, |attempt| async move {
///         if attempt < 3 {
///             Err(ErrorRecord::new("network.timeout", "slow origin"))
///         } else {
///             Ok(42)
///         }
///     })
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    emitter: Option<Arc<dyn EventEmitter>>,
    /// Set on events emitted during retries so telemetry can attribute them.
    scope: Option<(String, String, String)>, // (job_id, item_id, correlation_id)
}

impl RetryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Attribute emitted retry events to one item's processing.
    #[must_use]
    pub fn for_item(
        mut self,
        job_id: impl Into<String>,
        item_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.scope = Some((job_id.into(), item_id.into(), correlation_id.into()));
        self
    }

    /// Backoff delay before retry `k` (1-indexed first retry).
    ///
    /// `min(max_delay, base_delay * multiplier^(k-1))`, scaled by a uniform
    /// jitter draw from `[1 - J, 1 + J]`.
    #[must_use]
    pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = (policy.base_delay_ms as f64) * policy.multiplier.powi(exponent);
        let capped = base.min(policy.max_delay_ms as f64);
        let jitter = policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter == 0.0 {
            1.0
        } else {
            rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }

    /// Run `op` under `policy` until it succeeds, fails permanently, runs
    /// out of attempts, or is cancelled.
    ///
    /// `op` receives the 1-indexed attempt number. It must be safe to invoke
    /// at least once per attempt; the core assumes at-least-once semantics
    /// for caller operations. Panics inside `op` are caught and classified
    /// like any other failure (default transient).
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ErrorRecord>>,
    {
        let mut outcomes: Vec<AttemptOutcome> = Vec::new();
        // A zero-attempt policy never validates, but never loop forever on one.
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempt });
            }

            let result = AssertUnwindSafe(op(attempt)).catch_unwind().await;
            let error = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(panic) => ErrorRecord::panic(panic_message(&panic)),
            };

            let verdict = policy.classifier.classify(&error);
            if verdict == Verdict::Permanent {
                return Err(RetryError::Permanent {
                    attempt,
                    record: error,
                });
            }

            if attempt == max_attempts {
                outcomes.push(AttemptOutcome {
                    attempt,
                    error: error.clone(),
                    verdict,
                    delay: None,
                });
                return Err(RetryError::MaxRetriesExceeded {
                    attempts: outcomes,
                    last: error,
                });
            }

            let delay = Self::backoff_delay(policy, attempt);
            tracing::debug!(
                target: "crawlweave::retry",
                policy = %policy.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, backing off"
            );
            self.emit_retrying(attempt, delay);
            outcomes.push(AttemptOutcome {
                attempt,
                error,
                verdict,
                delay: Some(delay),
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        unreachable!("loop returns on success, permanent, exhaustion, or cancellation");
    }

    fn emit_retrying(&self, attempt: u32, delay: Duration) {
        let (Some(emitter), Some((job_id, item_id, correlation_id))) =
            (&self.emitter, &self.scope)
        else {
            return;
        };
        let _ = emitter.emit(Event::item(
            job_id.clone(),
            item_id.clone(),
            correlation_id.clone(),
            ItemOutcome::Retrying {
                attempt,
                delay_ms: delay.as_millis() as u64,
            },
            format!("attempt {attempt} failed, retrying"),
        ));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_respects_the_cap() {
        let policy = RetryPolicy::new("t")
            .with_base_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(0.0);
        assert_eq!(RetryEngine::backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(RetryEngine::backoff_delay(&policy, 2), Duration::from_millis(200));
        // 400 would exceed the cap.
        assert_eq!(RetryEngine::backoff_delay(&policy, 3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy::new("t")
            .with_base_delay(Duration::from_millis(1000))
            .with_multiplier(1.0)
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.25);
        for _ in 0..200 {
            let d = RetryEngine::backoff_delay(&policy, 1).as_millis() as u64;
            assert!((750..=1250).contains(&d), "delay {d} outside jitter band");
        }
    }
}
