use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::timeout;

use super::policy::{AbortAction, AbortPolicy, AbortStep};
use super::window::{OperationOutcome, OutcomeWindow};
use crate::event_bus::{Event, EventEmitter, NullEmitter};
use crate::failure::{ErrorRecord, FailureEvent};
use crate::types::JobId;

/// Why a job was aborted.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    FailureRate { rate: f64, threshold: f64 },
    ConsecutiveCrashes { count: u32 },
    CriticalFailure { message: String },
    /// Requested from outside the trigger conditions (Force-level cleanup,
    /// operator request).
    Requested { reason: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FailureRate { rate, threshold } => {
                write!(f, "failure rate {rate:.2} ≥ {threshold}")
            }
            AbortReason::ConsecutiveCrashes { count } => {
                write!(f, "{count} consecutive crashes")
            }
            AbortReason::CriticalFailure { message } => {
                write!(f, "critical failure: {message}")
            }
            AbortReason::Requested { reason } => write!(f, "abort requested: {reason}"),
        }
    }
}

/// Result of evaluating a job's window against a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortEvaluation {
    pub abort: bool,
    pub reason: Option<AbortReason>,
}

impl AbortEvaluation {
    fn keep_going() -> Self {
        Self {
            abort: false,
            reason: None,
        }
    }

    fn abort(reason: AbortReason) -> Self {
        Self {
            abort: true,
            reason: Some(reason),
        }
    }
}

/// Side effects the abort sequence needs from the rest of the system.
///
/// Implemented by the job runner's wiring: the controller itself stays free
/// of checkpoint-store and session-registry dependencies and just sequences
/// the steps.
#[async_trait]
pub trait AbortEffects: Send + Sync {
    /// Write a final checkpoint for the job, synchronously from the
    /// sequence's point of view.
    async fn save_state(&self, job_id: &str) -> Result<(), ErrorRecord>;

    /// Close browser sessions (all of them, or the named target).
    async fn cleanup(&self, job_id: &str, target: Option<&str>) -> Result<(), ErrorRecord>;

    /// Signal the job runner to stop at the current item boundary.
    async fn shutdown(&self, job_id: &str);
}

/// Evaluates rolling failure patterns and executes the abort sequence.
///
/// One controller serves all jobs in the process; windows and executed
/// aborts are tracked per job id. `execute` is idempotent per job: once an
/// abort ran, later calls are no-ops.
pub struct AbortController {
    windows: Mutex<FxHashMap<JobId, OutcomeWindow>>,
    executed: Mutex<FxHashMap<JobId, AbortReason>>,
    effects: Arc<dyn AbortEffects>,
    emitter: Arc<dyn EventEmitter>,
}

impl AbortController {
    pub fn new(effects: Arc<dyn AbortEffects>) -> Self {
        Self {
            windows: Mutex::new(FxHashMap::default()),
            executed: Mutex::new(FxHashMap::default()),
            effects,
            emitter: Arc::new(NullEmitter),
        }
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Record a successful operation outcome for a job.
    pub fn record_success(&self, job_id: &str, policy: &AbortPolicy) {
        self.push(job_id, policy, OperationOutcome::success());
    }

    /// Record a failed operation outcome for a job.
    pub fn record_failure(&self, job_id: &str, policy: &AbortPolicy, event: &FailureEvent) {
        self.push(
            job_id,
            policy,
            OperationOutcome::failure(event.category, event.severity),
        );
    }

    fn push(&self, job_id: &str, policy: &AbortPolicy, outcome: OperationOutcome) {
        let mut windows = self.windows.lock();
        windows
            .entry(job_id.to_string())
            .or_insert_with(|| OutcomeWindow::new(policy.window_size))
            .push(outcome);
    }

    /// Evaluate a job's window against the policy's trigger conditions.
    ///
    /// Never trips during the grace period (fewer than `min_operations`
    /// recorded outcomes) — with one exception: a Critical failure aborts
    /// regardless, because it is an explicit signal rather than a pattern.
    pub fn evaluate(&self, job_id: &str, policy: &AbortPolicy) -> AbortEvaluation {
        let windows = self.windows.lock();
        let Some(window) = windows.get(job_id) else {
            return AbortEvaluation::keep_going();
        };

        if window.critical_seen() {
            return AbortEvaluation::abort(AbortReason::CriticalFailure {
                message: "critical-severity failure recorded".to_string(),
            });
        }

        if window.len() < policy.min_operations {
            return AbortEvaluation::keep_going();
        }

        let crashes = window.consecutive_crashes();
        if policy.max_consecutive_crashes > 0 && crashes >= policy.max_consecutive_crashes {
            return AbortEvaluation::abort(AbortReason::ConsecutiveCrashes { count: crashes });
        }

        let rate = window.failure_rate();
        let span_secs = window.span().num_seconds().max(0) as u64;
        if rate >= policy.failure_rate_threshold && span_secs <= policy.window_duration_secs {
            return AbortEvaluation::abort(AbortReason::FailureRate {
                rate,
                threshold: policy.failure_rate_threshold,
            });
        }

        AbortEvaluation::keep_going()
    }

    /// Whether an abort has already run for this job.
    pub fn aborted(&self, job_id: &str) -> Option<AbortReason> {
        self.executed.lock().get(job_id).cloned()
    }

    /// Run the policy's abort sequence for a job.
    ///
    /// Actions run sequentially in declared order, each under its own
    /// timeout; a timed-out or failed action is logged and the next one
    /// runs. Idempotent per job: the first call wins, later calls return
    /// immediately.
    pub async fn execute(&self, job_id: &str, policy: &AbortPolicy, reason: AbortReason) {
        {
            let mut executed = self.executed.lock();
            if executed.contains_key(job_id) {
                tracing::debug!(
                    target: "crawlweave::abort",
                    job_id,
                    "abort already executed; ignoring"
                );
                return;
            }
            executed.insert(job_id.to_string(), reason.clone());
        }

        tracing::warn!(
            target: "crawlweave::abort",
            job_id,
            %reason,
            "executing abort sequence"
        );

        for step in &policy.actions {
            let outcome = timeout(step.timeout(), self.run_step(job_id, step, &reason)).await;
            match outcome {
                Ok(Ok(())) => {
                    let _ = self.emitter.emit(Event::abort(
                        job_id,
                        step.action.as_str(),
                        format!("abort action completed ({reason})"),
                    ));
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        target: "crawlweave::abort",
                        job_id,
                        action = step.action.as_str(),
                        %err,
                        "abort action failed; continuing with the next one"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        target: "crawlweave::abort",
                        job_id,
                        action = step.action.as_str(),
                        timeout_ms = step.timeout_ms,
                        "abort action timed out; continuing with the next one"
                    );
                }
            }
        }
    }

    async fn run_step(
        &self,
        job_id: &str,
        step: &AbortStep,
        reason: &AbortReason,
    ) -> Result<(), ErrorRecord> {
        match step.action {
            AbortAction::SaveState => self.effects.save_state(job_id).await,
            AbortAction::Cleanup => self.effects.cleanup(job_id, step.target.as_deref()).await,
            AbortAction::Notify => {
                let _ = self.emitter.emit(Event::abort(
                    job_id,
                    "notify",
                    format!("job aborting: {reason}"),
                ));
                Ok(())
            }
            AbortAction::LogEvent => {
                tracing::error!(
                    target: "crawlweave::abort",
                    job_id,
                    %reason,
                    "job aborted"
                );
                let _ = self
                    .emitter
                    .emit(Event::diagnostic("abort", format!("job {job_id} aborted: {reason}")));
                Ok(())
            }
            AbortAction::Shutdown => {
                self.effects.shutdown(job_id).await;
                Ok(())
            }
        }
    }

    /// Drop per-job bookkeeping once a job is finished.
    pub fn forget(&self, job_id: &str) {
        self.windows.lock().remove(job_id);
    }

    /// Number of outcomes currently recorded for a job. Mostly for tests
    /// and status displays.
    pub fn recorded(&self, job_id: &str) -> usize {
        self.windows.lock().get(job_id).map_or(0, OutcomeWindow::len)
    }
}

/// Effects that do nothing, for exercising the controller in isolation.
#[derive(Debug, Default)]
pub struct NoopEffects;

#[async_trait]
impl AbortEffects for NoopEffects {
    async fn save_state(&self, _job_id: &str) -> Result<(), ErrorRecord> {
        Ok(())
    }

    async fn cleanup(&self, _job_id: &str, _target: Option<&str>) -> Result<(), ErrorRecord> {
        Ok(())
    }

    async fn shutdown(&self, _job_id: &str) {}
}

/// Convenience for tests and Force-level escalations: evaluate and, if
/// tripped, execute in one call.
impl AbortController {
    pub async fn evaluate_and_execute(
        &self,
        job_id: &str,
        policy: &AbortPolicy,
    ) -> Option<AbortReason> {
        let evaluation = self.evaluate(job_id, policy);
        if !evaluation.abort {
            return None;
        }
        let reason = evaluation.reason.unwrap_or(AbortReason::Requested {
            reason: "abort tripped without a recorded reason".to_string(),
        });
        self.execute(job_id, policy, reason.clone()).await;
        Some(reason)
    }
}

