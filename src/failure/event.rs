use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use super::record::ErrorRecord;

/// How much a failure matters. `Critical` failures trip the abort controller
/// unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Broad origin of a failure. `Browser` and `System` failures count as
/// crashes for the abort controller's consecutive-crash trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    Network,
    Browser,
    System,
    Application,
    External,
}

impl FailureCategory {
    /// Whether failures in this category count toward consecutive crashes.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        matches!(self, FailureCategory::Browser | FailureCategory::System)
    }

    /// Derive a category from an error record's kind prefix.
    ///
    /// Kinds follow the dotted convention of [`ErrorRecord`]; anything
    /// unrecognized lands in `Application`.
    pub fn from_record(record: &ErrorRecord) -> Self {
        let kind = record.kind.to_ascii_lowercase();
        let prefix = kind.split('.').next().unwrap_or("");
        match prefix {
            "network" | "http" | "dns" | "tls" | "timeout" => FailureCategory::Network,
            "browser" | "page" | "selector" => FailureCategory::Browser,
            "system" | "memory" | "disk" | "panic" => FailureCategory::System,
            "external" | "upstream" => FailureCategory::External,
            _ => FailureCategory::Application,
        }
    }
}

/// Recovery verb chosen (or pending) for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryAction {
    Retry,
    Restart,
    Skip,
    Abort,
    Manual,
}

/// Concrete recovery decision produced by the failure handler.
///
/// The job runner acts on decisions, never on raw errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// Re-run the operation after the given delay.
    Retry { delay: Duration },
    /// Restart a collaborator (usually a browser session) and re-run once.
    Restart { target: Option<String> },
    /// Mark the item failed and move on.
    Skip,
    /// Stop the job through the abort controller.
    Abort { reason: String },
}

impl RecoveryDecision {
    /// The action verb recorded on the failure event for this decision.
    #[must_use]
    pub fn action(&self) -> RecoveryAction {
        match self {
            RecoveryDecision::Retry { .. } => RecoveryAction::Retry,
            RecoveryDecision::Restart { .. } => RecoveryAction::Restart,
            RecoveryDecision::Skip => RecoveryAction::Skip,
            RecoveryDecision::Abort { .. } => RecoveryAction::Abort,
        }
    }
}

/// Everything the core knows about one failure.
///
/// Built by the job runner when an operation finally fails, then threaded
/// through the failure handler and the abort controller, and persisted (in
/// bounded number) in checkpoint payloads.
///
/// # Examples
///
/// ```
/// use crawlweave::failure::{ErrorRecord, FailureCategory, FailureEvent, Severity};
///
/// let event = FailureEvent::new(
///     FailureCategory::Network,
///     Severity::Medium,
///     "operation-runner",
///     ErrorRecord::new("network.timeout", "read timed out"),
///     "corr-1234",
/// )
/// .with_context("item", serde_json::json!("https://example.com/p/9"));
/// assert!(event.resolved_at.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub category: FailureCategory,
    /// Component that observed the failure (`operation-runner`,
    /// `checkpoint-store`, ...).
    pub source: String,
    pub record: ErrorRecord,
    #[serde(default)]
    pub context: FxHashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Recovery action taken, filled in once the handler has decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<RecoveryAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Correlation id carried from the item being processed.
    pub correlation_id: String,
}

impl FailureEvent {
    pub fn new(
        category: FailureCategory,
        severity: Severity,
        source: impl Into<String>,
        record: ErrorRecord,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            severity,
            category,
            source: source.into(),
            record,
            context: FxHashMap::default(),
            stack_trace: None,
            action: None,
            resolved_at: None,
            correlation_id: correlation_id.into(),
        }
    }

    /// Build an event from a record alone, deriving category from the kind
    /// prefix and defaulting severity to `Medium`.
    pub fn from_record(
        record: ErrorRecord,
        source: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let category = FailureCategory::from_record(&record);
        Self::new(category, Severity::Medium, source, record, correlation_id)
    }

    pub fn message(&self) -> &str {
        &self.record.message
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Stamp the decision taken for this failure and the resolution time.
    pub fn resolve(&mut self, action: RecoveryAction) {
        self.action = Some(action);
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_derivation_follows_kind_prefix() {
        let rec = |kind: &str| ErrorRecord::new(kind, "x");
        assert_eq!(
            FailureCategory::from_record(&rec("network.timeout")),
            FailureCategory::Network
        );
        assert_eq!(
            FailureCategory::from_record(&rec("browser.crash")),
            FailureCategory::Browser
        );
        assert_eq!(
            FailureCategory::from_record(&rec("panic")),
            FailureCategory::System
        );
        assert_eq!(
            FailureCategory::from_record(&rec("parse.malformed")),
            FailureCategory::Application
        );
    }

    #[test]
    fn crash_categories() {
        assert!(FailureCategory::Browser.is_crash());
        assert!(FailureCategory::System.is_crash());
        assert!(!FailureCategory::Network.is_crash());
    }

    #[test]
    fn resolve_stamps_action_and_time() {
        let mut event = FailureEvent::from_record(
            ErrorRecord::new("network.reset", "connection reset"),
            "operation-runner",
            "corr-1",
        );
        event.resolve(RecoveryAction::Retry);
        assert_eq!(event.action, Some(RecoveryAction::Retry));
        assert!(event.resolved_at.is_some());
    }
}
