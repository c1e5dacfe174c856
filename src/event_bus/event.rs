use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed events published on the core's event bus.
///
/// Every subsystem reports through this vocabulary: the job runner announces
/// lifecycle transitions, the retry engine announces attempts, the resource
/// monitor announces breaches and cleanup, the checkpoint manager announces
/// writes and fallbacks, and the abort controller announces each action it
/// executes. Subscribers pick the kinds they care about; none of them may
/// mutate job state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Job(JobEvent),
    Item(ItemEvent),
    Resource(ResourceEvent),
    Checkpoint(CheckpointEvent),
    Abort(AbortEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn job(job_id: impl Into<String>, stage: JobStage, message: impl Into<String>) -> Self {
        Event::Job(JobEvent {
            job_id: job_id.into(),
            correlation_id: None,
            stage,
            message: message.into(),
        })
    }

    pub fn item(
        job_id: impl Into<String>,
        item_id: impl Into<String>,
        correlation_id: impl Into<String>,
        outcome: ItemOutcome,
        message: impl Into<String>,
    ) -> Self {
        Event::Item(ItemEvent {
            job_id: job_id.into(),
            item_id: item_id.into(),
            correlation_id: correlation_id.into(),
            outcome,
            message: message.into(),
        })
    }

    pub fn resource(metric: impl Into<String>, level: Option<String>, message: impl Into<String>) -> Self {
        Event::Resource(ResourceEvent {
            metric: metric.into(),
            level,
            message: message.into(),
        })
    }

    pub fn checkpoint(
        job_id: impl Into<String>,
        sequence: u64,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Checkpoint(CheckpointEvent {
            job_id: job_id.into(),
            sequence,
            status: status.into(),
            message: message.into(),
        })
    }

    pub fn abort(job_id: impl Into<String>, action: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Abort(AbortEvent {
            job_id: job_id.into(),
            action: action.into(),
            message: message.into(),
        })
    }

    /// Short label identifying the event family, used by formatters and
    /// scope-based filtering in sinks.
    pub fn scope_label(&self) -> &str {
        match self {
            Event::Job(_) => "job",
            Event::Item(_) => "item",
            Event::Resource(_) => "resource",
            Event::Checkpoint(_) => "checkpoint",
            Event::Abort(_) => "abort",
            Event::Diagnostic(diag) => diag.scope.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Job(e) => &e.message,
            Event::Item(e) => &e.message,
            Event::Resource(e) => &e.message,
            Event::Checkpoint(e) => &e.message,
            Event::Abort(e) => &e.message,
            Event::Diagnostic(e) => &e.message,
        }
    }

    /// Correlation id carried by the event, when the emitting subsystem had
    /// one in scope.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Event::Job(e) => e.correlation_id.as_deref(),
            Event::Item(e) => Some(e.correlation_id.as_str()),
            _ => None,
        }
    }

    /// Convert the event to a normalized JSON object:
    ///
    /// ```json
    /// {
    ///   "type": "item",
    ///   "scope": "item",
    ///   "message": "...",
    ///   "timestamp": "2026-03-01T12:34:56.789Z",
    ///   "metadata": { /* variant-specific fields */ }
    /// }
    /// ```
    pub fn to_json_value(&self) -> Value {
        use serde_json::json;

        let (event_type, metadata) = match self {
            Event::Job(e) => {
                let mut meta = serde_json::Map::new();
                meta.insert("job_id".into(), json!(e.job_id));
                meta.insert("stage".into(), json!(e.stage.as_str()));
                if let Some(cid) = &e.correlation_id {
                    meta.insert("correlation_id".into(), json!(cid));
                }
                ("job", Value::Object(meta))
            }
            Event::Item(e) => {
                let mut meta = serde_json::Map::new();
                meta.insert("job_id".into(), json!(e.job_id));
                meta.insert("item_id".into(), json!(e.item_id));
                meta.insert("correlation_id".into(), json!(e.correlation_id));
                meta.insert("outcome".into(), e.outcome.to_json_value());
                ("item", Value::Object(meta))
            }
            Event::Resource(e) => {
                let mut meta = serde_json::Map::new();
                meta.insert("metric".into(), json!(e.metric));
                if let Some(level) = &e.level {
                    meta.insert("level".into(), json!(level));
                }
                ("resource", Value::Object(meta))
            }
            Event::Checkpoint(e) => {
                let mut meta = serde_json::Map::new();
                meta.insert("job_id".into(), json!(e.job_id));
                meta.insert("sequence".into(), json!(e.sequence));
                meta.insert("status".into(), json!(e.status));
                ("checkpoint", Value::Object(meta))
            }
            Event::Abort(e) => {
                let mut meta = serde_json::Map::new();
                meta.insert("job_id".into(), json!(e.job_id));
                meta.insert("action".into(), json!(e.action));
                ("abort", Value::Object(meta))
            }
            Event::Diagnostic(_) => ("diagnostic", Value::Object(serde_json::Map::new())),
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": metadata,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Job(e) => write!(f, "[{} {}] {}", e.job_id, e.stage.as_str(), e.message),
            Event::Item(e) => write!(f, "[{}/{}] {}", e.job_id, e.item_id, e.message),
            Event::Resource(e) => match &e.level {
                Some(level) => write!(f, "[resource {} -> {}] {}", e.metric, level, e.message),
                None => write!(f, "[resource {}] {}", e.metric, e.message),
            },
            Event::Checkpoint(e) => {
                write!(f, "[checkpoint {}#{}] {}", e.job_id, e.sequence, e.message)
            }
            Event::Abort(e) => write!(f, "[abort {} {}] {}", e.job_id, e.action, e.message),
            Event::Diagnostic(e) => write!(f, "{}", e.message),
        }
    }
}

/// Job lifecycle transition announced by the runner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: String,
    pub correlation_id: Option<String>,
    pub stage: JobStage,
    pub message: String,
}

impl JobEvent {
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Started,
    Resumed,
    Completed,
    Aborted,
    Cancelled,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Started => "started",
            JobStage::Resumed => "resumed",
            JobStage::Completed => "completed",
            JobStage::Aborted => "aborted",
            JobStage::Cancelled => "cancelled",
        }
    }
}

/// Per-item outcome announced as the runner moves through the job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemEvent {
    pub job_id: String,
    pub item_id: String,
    pub correlation_id: String,
    pub outcome: ItemOutcome,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded { attempts: u32 },
    Retrying { attempt: u32, delay_ms: u64 },
    Failed { action: String },
    Skipped,
}

impl ItemOutcome {
    fn to_json_value(&self) -> Value {
        use serde_json::json;
        match self {
            ItemOutcome::Succeeded { attempts } => json!({"kind": "succeeded", "attempts": attempts}),
            ItemOutcome::Retrying { attempt, delay_ms } => {
                json!({"kind": "retrying", "attempt": attempt, "delay_ms": delay_ms})
            }
            ItemOutcome::Failed { action } => json!({"kind": "failed", "action": action}),
            ItemOutcome::Skipped => json!({"kind": "skipped"}),
        }
    }
}

/// Threshold breach or cleanup announcement from the resource monitor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEvent {
    pub metric: String,
    /// Cleanup level requested, when the breach escalated to one.
    pub level: Option<String>,
    pub message: String,
}

/// Checkpoint write, promotion, or fallback announcement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointEvent {
    pub job_id: String,
    pub sequence: u64,
    pub status: String,
    pub message: String,
}

/// One abort action executed (or timed out) by the abort controller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbortEvent {
    pub job_id: String,
    pub action: String,
    pub message: String,
}

/// Free-form diagnostic, the catch-all for subsystem telemetry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}
