use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from abort-policy validation.
#[derive(Debug, Error, Diagnostic)]
pub enum AbortPolicyError {
    #[error("failure_rate_threshold {value} outside 0.0..=1.0")]
    #[diagnostic(code(crawlweave::abort::rate_threshold))]
    RateThreshold { value: f64 },

    #[error("window_size must be at least 1")]
    #[diagnostic(code(crawlweave::abort::window_size))]
    WindowSize,

    #[error("min_operations {min} exceeds window_size {window}")]
    #[diagnostic(
        code(crawlweave::abort::grace_exceeds_window),
        help("the ring can never hold min_operations entries, so evaluation would be skipped forever")
    )]
    GraceExceedsWindow { min: usize, window: usize },
}

/// The verbs an abort sequence can run, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortAction {
    /// Write a final checkpoint through the checkpoint manager.
    SaveState,
    /// Close browser sessions.
    Cleanup,
    /// Publish a notification event on the bus.
    Notify,
    /// Publish a structured log event on the bus.
    LogEvent,
    /// Signal the job runner to stop at the current item boundary.
    Shutdown,
}

impl AbortAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortAction::SaveState => "save_state",
            AbortAction::Cleanup => "cleanup",
            AbortAction::Notify => "notify",
            AbortAction::LogEvent => "log_event",
            AbortAction::Shutdown => "shutdown",
        }
    }
}

/// One step of the abort sequence: an action, an optional target, and the
/// step's own timeout. A timed-out step is logged and the next one runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortStep {
    pub action: AbortAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default = "default_step_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_step_timeout_ms() -> u64 {
    10_000
}

impl AbortStep {
    pub fn new(action: AbortAction) -> Self {
        Self {
            action,
            target: None,
            timeout_ms: default_step_timeout_ms(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// When and how a job gets aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortPolicy {
    /// Failure rate in the sliding window that trips an abort, 0.0..=1.0.
    pub failure_rate_threshold: f64,
    /// Number of operation outcomes the window holds.
    pub window_size: usize,
    /// The rate trigger only fires while the window spans at most this many
    /// seconds — stale failures spread over hours are not a storm.
    pub window_duration_secs: u64,
    /// Consecutive Browser/System failures that trip an abort.
    pub max_consecutive_crashes: u32,
    /// Grace period: evaluation is skipped below this many recorded
    /// outcomes.
    pub min_operations: usize,
    /// Abort sequence, executed in order.
    pub actions: Vec<AbortStep>,
}

impl Default for AbortPolicy {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window_size: 20,
            window_duration_secs: 600,
            max_consecutive_crashes: 3,
            min_operations: 10,
            actions: vec![
                AbortStep::new(AbortAction::SaveState),
                AbortStep::new(AbortAction::Cleanup),
                AbortStep::new(AbortAction::Notify),
                AbortStep::new(AbortAction::LogEvent),
                AbortStep::new(AbortAction::Shutdown),
            ],
        }
    }
}

impl AbortPolicy {
    pub fn validate(&self) -> Result<(), AbortPolicyError> {
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(AbortPolicyError::RateThreshold {
                value: self.failure_rate_threshold,
            });
        }
        if self.window_size == 0 {
            return Err(AbortPolicyError::WindowSize);
        }
        if self.min_operations > self.window_size {
            return Err(AbortPolicyError::GraceExceedsWindow {
                min: self.min_operations,
                window: self.window_size,
            });
        }
        Ok(())
    }
}
