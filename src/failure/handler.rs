use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::event::{FailureCategory, FailureEvent, RecoveryDecision, Severity};
use crate::abort::{AbortController, AbortPolicy};
use crate::event_bus::{Event, EventEmitter, NullEmitter};
use crate::retry::{RetryEngine, RetryPolicy, Verdict};
use crate::types::{CorrelationId, ItemId, JobId};

/// Read-only context handed to per-category handlers alongside the event.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub job_id: JobId,
    pub item_id: Option<ItemId>,
    pub correlation_id: CorrelationId,
    /// Attempts already consumed by the retry engine for this operation.
    pub attempt: u32,
    /// Whether the operation's retry budget is spent.
    pub retries_exhausted: bool,
    pub data: FxHashMap<String, Value>,
}

impl FailureContext {
    pub fn new(job_id: impl Into<JobId>, correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            job_id: job_id.into(),
            item_id: None,
            correlation_id: correlation_id.into(),
            attempt: 1,
            retries_exhausted: false,
            data: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item_id: impl Into<ItemId>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32, exhausted: bool) -> Self {
        self.attempt = attempt;
        self.retries_exhausted = exhausted;
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// A caller-registered decision function for one failure category.
///
/// Handlers must be pure with respect to the event: they may read the event
/// and context but must not reach into job state. Returning `None` defers to
/// the next handler, and ultimately to the default mapping.
pub trait CategoryHandler: Send + Sync {
    fn decide(&self, event: &FailureEvent, ctx: &FailureContext) -> Option<RecoveryDecision>;

    fn name(&self) -> &str {
        "category-handler"
    }
}

impl<F> CategoryHandler for F
where
    F: Fn(&FailureEvent, &FailureContext) -> Option<RecoveryDecision> + Send + Sync,
{
    fn decide(&self, event: &FailureEvent, ctx: &FailureContext) -> Option<RecoveryDecision> {
        self(event, ctx)
    }
}

/// Routes every failure through classification, abort accounting, and the
/// registered handlers, and produces a single recovery decision.
///
/// Decision pipeline:
/// 1. classify the record via the operation's retry policy;
/// 2. a permanent or retries-exhausted failure is recorded with the abort
///    controller (this is the only place failed operations enter the
///    sliding window);
/// 3. registered handlers for the event's category run in order — the first
///    decision wins;
/// 4. default mapping: critical → Abort, permanent → Skip, transient with
///    budget left → Retry at the next backoff delay, exhausted transient →
///    Skip.
pub struct FailureHandler {
    handlers: FxHashMap<FailureCategory, Vec<Arc<dyn CategoryHandler>>>,
    abort: Arc<AbortController>,
    emitter: Arc<dyn EventEmitter>,
}

impl FailureHandler {
    pub fn new(abort: Arc<AbortController>) -> Self {
        Self {
            handlers: FxHashMap::default(),
            abort,
            emitter: Arc::new(NullEmitter),
        }
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Register a handler for one category. Handlers run in registration
    /// order within a category.
    pub fn register(&mut self, category: FailureCategory, handler: Arc<dyn CategoryHandler>) {
        self.handlers.entry(category).or_default().push(handler);
    }

    /// Decide how to recover from one failure.
    ///
    /// The event is resolved in place: its `action` and `resolved_at` fields
    /// record the decision taken.
    pub fn handle(
        &self,
        event: &mut FailureEvent,
        ctx: &FailureContext,
        policy: &RetryPolicy,
        abort_policy: &AbortPolicy,
    ) -> RecoveryDecision {
        let verdict = policy.classifier.classify(&event.record);
        let terminal = verdict == Verdict::Permanent || ctx.retries_exhausted;

        if terminal {
            self.abort.record_failure(&ctx.job_id, abort_policy, event);
        }

        let decision = self
            .consult(event, ctx)
            .unwrap_or_else(|| self.default_decision(event, ctx, policy, verdict));

        event.resolve(decision.action());
        tracing::info!(
            target: "crawlweave::failure",
            job_id = %ctx.job_id,
            correlation_id = %ctx.correlation_id,
            item = ctx.item_id.as_deref().unwrap_or("-"),
            category = ?event.category,
            severity = ?event.severity,
            verdict = ?verdict,
            decision = ?decision.action(),
            error = %event.record,
            "failure handled"
        );
        let _ = self.emitter.emit(Event::diagnostic(
            "failure",
            format!(
                "{} [{}]: {} -> {:?}",
                ctx.job_id, ctx.correlation_id, event.record, decision.action()
            ),
        ));
        decision
    }

    fn consult(&self, event: &FailureEvent, ctx: &FailureContext) -> Option<RecoveryDecision> {
        let handlers = self.handlers.get(&event.category)?;
        for handler in handlers {
            if let Some(decision) = handler.decide(event, ctx) {
                tracing::debug!(
                    target: "crawlweave::failure",
                    handler = handler.name(),
                    category = ?event.category,
                    "custom handler produced a decision"
                );
                return Some(decision);
            }
        }
        None
    }

    fn default_decision(
        &self,
        event: &FailureEvent,
        ctx: &FailureContext,
        policy: &RetryPolicy,
        verdict: Verdict,
    ) -> RecoveryDecision {
        if event.severity == Severity::Critical {
            return RecoveryDecision::Abort {
                reason: format!("critical failure: {}", event.record),
            };
        }
        match verdict {
            Verdict::Permanent => RecoveryDecision::Skip,
            Verdict::Transient if ctx.retries_exhausted => RecoveryDecision::Skip,
            Verdict::Transient => RecoveryDecision::Retry {
                delay: RetryEngine::backoff_delay(policy, ctx.attempt.max(1)),
            },
        }
    }
}
