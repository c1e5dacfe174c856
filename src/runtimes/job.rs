use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::config::CoreConfig;
use super::progress::{ProgressError, ProgressState};
use super::registry::{JobStatus, Registry};
use crate::abort::{
    AbortController, AbortEffects, AbortPolicy, AbortPolicyError, AbortReason,
};
use crate::checkpoint::{
    CheckpointDraft, CheckpointError, FileCheckpointStore, MigrationRegistry, RECENT_ERRORS_CAP,
};
use crate::event_bus::{Event, EventBus, EventEmitter, EventStream, ItemOutcome, JobStage};
use crate::failure::{
    CategoryHandler, ErrorRecord, FailureCategory, FailureContext, FailureEvent, FailureHandler,
    RecoveryAction, RecoveryDecision, Severity,
};
use crate::monitor::{
    BreachHandler, BreachReport, BrowserSessionRegistry, CleanupLevel, ResourceMonitor,
    ResourceThreshold,
};
use crate::retry::{PolicyError, RetryEngine, RetryError, RetryPolicy};
use crate::types::{CorrelationId, IdGenerator, ItemId, JobId};

/// One job submission: the ordered item list and the policies it runs under.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: JobId,
    pub items: Vec<ItemId>,
    pub retry_policy: RetryPolicy,
    pub abort_policy: AbortPolicy,
    pub threshold: ResourceThreshold,
}

impl JobSpec {
    pub fn new(job_id: impl Into<JobId>, items: Vec<ItemId>) -> Self {
        Self {
            job_id: job_id.into(),
            items,
            retry_policy: RetryPolicy::standard(),
            abort_policy: AbortPolicy::default(),
            threshold: ResourceThreshold::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: ResourceThreshold) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Context handed to the caller's operation on every attempt.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub job_id: JobId,
    pub item_id: ItemId,
    pub correlation_id: CorrelationId,
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub emitter: Arc<dyn EventEmitter>,
    /// Register/retire browser sessions here so the monitor can watch their
    /// lifetimes.
    pub sessions: Arc<BrowserSessionRegistry>,
    pub cancel: CancellationToken,
}

/// Caller-supplied per-item operation.
///
/// Must be safely retryable: the core assumes at-least-once execution, and
/// a resumed job re-processes the item that was in flight when the process
/// died.
#[async_trait]
pub trait ItemOperation: Send + Sync {
    async fn run(&self, item: &str, ctx: &OperationContext) -> Result<Value, ErrorRecord>;
}

#[async_trait]
impl<F, Fut> ItemOperation for F
where
    F: Fn(String, OperationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ErrorRecord>> + Send,
{
    async fn run(&self, item: &str, ctx: &OperationContext) -> Result<Value, ErrorRecord> {
        self(item.to_string(), ctx.clone()).await
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Aborted { reason: String },
    Cancelled,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => f.write_str("completed"),
            JobOutcome::Aborted { reason } => write!(f, "aborted ({reason})"),
            JobOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What the caller gets back from [`JobRunner::run_job`].
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    pub total_items: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Recovery decision recorded for every terminal failure, in order.
    pub decisions: Vec<(ItemId, RecoveryAction)>,
    /// Sequence number of the checkpoint the job resumed from, if any.
    pub resumed_from: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl JobReport {
    /// Human-readable wrap-up: counts, the decision for each failed item,
    /// and the abort cause when there is one.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "job {}: {} — {} completed, {} failed, {} pending of {} in {:.1}s",
            self.job_id,
            self.outcome,
            self.completed,
            self.failed,
            self.pending,
            self.total_items,
            self.duration.as_secs_f64(),
        );
        if let Some(seq) = self.resumed_from {
            out.push_str(&format!(" (resumed from checkpoint #{seq})"));
        }
        for (item, action) in &self.decisions {
            out.push_str(&format!("\n  {item}: {action:?}"));
        }
        out
    }
}

/// Errors that make a job submission itself fail. Per-item failures never
/// show up here — they are folded into the report.
#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    #[error("job already running: {job_id}")]
    #[diagnostic(code(crawlweave::runner::already_running))]
    AlreadyRunning { job_id: JobId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    RetryPolicy(#[from] PolicyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    AbortPolicy(#[from] AbortPolicyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Progress(#[from] ProgressError),
}

type SharedDraft = Arc<ParkingMutex<Option<CheckpointDraft>>>;

/// Latest-cleanup-level mailbox between the monitor's breach handler and
/// the runner's item loop. Levels only ever go up until the runner drains
/// the slot at the next item boundary.
struct CleanupRelay {
    pending: Arc<ParkingMutex<Option<CleanupLevel>>>,
}

#[async_trait]
impl BreachHandler for CleanupRelay {
    async fn on_breach(&self, report: BreachReport) {
        let mut pending = self.pending.lock();
        *pending = Some(match pending.take() {
            Some(previous) => previous.max(report.level),
            None => report.level,
        });
    }
}

/// Per-job hooks the abort sequence reaches the runner through.
struct JobWiring {
    cancel: CancellationToken,
    draft: SharedDraft,
}

/// [`AbortEffects`] implementation backed by the runner's collaborators.
/// The abort controller stays ignorant of stores and registries; this is
/// where its verbs land.
struct RunnerEffects {
    store: Arc<FileCheckpointStore>,
    sessions: Arc<BrowserSessionRegistry>,
    wirings: ParkingMutex<FxHashMap<JobId, JobWiring>>,
}

impl RunnerEffects {
    fn register_job(&self, job_id: &str, cancel: CancellationToken, draft: SharedDraft) {
        self.wirings
            .lock()
            .insert(job_id.to_string(), JobWiring { cancel, draft });
    }

    fn deregister_job(&self, job_id: &str) {
        self.wirings.lock().remove(job_id);
    }

    fn cancel_job(&self, job_id: &str) -> bool {
        match self.wirings.lock().get(job_id) {
            Some(wiring) => {
                wiring.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AbortEffects for RunnerEffects {
    async fn save_state(&self, job_id: &str) -> Result<(), ErrorRecord> {
        let draft = {
            self.wirings
                .lock()
                .get(job_id)
                .and_then(|wiring| wiring.draft.lock().clone())
        };
        let Some(draft) = draft else {
            return Err(ErrorRecord::new(
                "checkpoint.missing",
                format!("no progress snapshot registered for job {job_id}"),
            ));
        };
        self.store
            .create(job_id, draft)
            .await
            .map(|_| ())
            .map_err(|err| ErrorRecord::new("checkpoint.write", err.to_string()))
    }

    async fn cleanup(&self, _job_id: &str, target: Option<&str>) -> Result<(), ErrorRecord> {
        match target {
            Some(session) => {
                self.sessions.retire(session);
            }
            None => {
                self.sessions.retire_all();
            }
        }
        Ok(())
    }

    async fn shutdown(&self, job_id: &str) {
        if let Some(wiring) = self.wirings.lock().get(job_id) {
            wiring.cancel.cancel();
        }
    }
}

/// Sequences a job's items and wires the retry engine, checkpoint manager,
/// resource monitor, abort controller, and failure handler together.
///
/// The runner exclusively owns each job's [`ProgressState`]; every other
/// subsystem sees read-only snapshots. One runner serves many sequential or
/// interleaved jobs in one process.
pub struct JobRunner {
    config: CoreConfig,
    store: Arc<FileCheckpointStore>,
    monitor: Arc<ResourceMonitor>,
    abort: Arc<AbortController>,
    failure: FailureHandler,
    effects: Arc<RunnerEffects>,
    registry: Arc<Registry>,
    sessions: Arc<BrowserSessionRegistry>,
    bus: EventBus,
    emitter: Arc<dyn EventEmitter>,
    cancel_root: CancellationToken,
    id_gen: IdGenerator,
}

impl JobRunner {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_migrations(config, MigrationRegistry::new())
    }

    /// Build a runner whose checkpoint store knows the given schema
    /// migrations.
    pub fn with_migrations(config: CoreConfig, migrations: MigrationRegistry) -> Self {
        let bus = config.event_bus.build_event_bus();
        bus.listen_for_events();
        let emitter = bus.get_emitter();

        let sessions = Arc::new(BrowserSessionRegistry::new());
        let store = Arc::new(
            FileCheckpointStore::new(&config.storage_root, config.retention_count)
                .with_expiry_grace(config.expiry_grace)
                .with_migrations(migrations)
                .with_emitter(Arc::clone(&emitter)),
        );
        let monitor = Arc::new(
            ResourceMonitor::new(Arc::clone(&sessions))
                .with_interval(config.monitoring_interval)
                .with_disk_path(&config.storage_root)
                .with_emitter(Arc::clone(&emitter)),
        );
        let effects = Arc::new(RunnerEffects {
            store: Arc::clone(&store),
            sessions: Arc::clone(&sessions),
            wirings: ParkingMutex::new(FxHashMap::default()),
        });
        let abort = Arc::new(
            AbortController::new(Arc::clone(&effects) as Arc<dyn AbortEffects>)
                .with_emitter(Arc::clone(&emitter)),
        );
        let failure = FailureHandler::new(Arc::clone(&abort)).with_emitter(Arc::clone(&emitter));

        Self {
            config,
            store,
            monitor,
            abort,
            failure,
            effects,
            registry: Arc::new(Registry::new()),
            sessions,
            bus,
            emitter,
            cancel_root: CancellationToken::new(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Build a spec seeded with this runner's configured default retry
    /// policy preset.
    pub fn spec(&self, job_id: impl Into<JobId>, items: Vec<ItemId>) -> JobSpec {
        let policy = RetryPolicy::preset(&self.config.default_retry_policy)
            .unwrap_or_else(RetryPolicy::standard);
        JobSpec::new(job_id, items).with_retry_policy(policy)
    }

    /// Register a custom per-category recovery handler.
    pub fn register_failure_handler(
        &mut self,
        category: FailureCategory,
        handler: Arc<dyn CategoryHandler>,
    ) {
        self.failure.register(category, handler);
    }

    pub fn sessions(&self) -> Arc<BrowserSessionRegistry> {
        Arc::clone(&self.sessions)
    }

    pub fn store(&self) -> Arc<FileCheckpointStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Subscribe to the runner's event bus.
    pub fn event_stream(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Status of a known job.
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.registry.status(job_id)
    }

    /// Cancel one running job. Returns whether the job was known.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.effects.cancel_job(job_id)
    }

    /// Cancel every job this runner is driving.
    pub fn cancel_all(&self) {
        self.cancel_root.cancel();
    }

    /// Drive a job to completion, abort, or cancellation.
    ///
    /// Resumes from the latest validated checkpoint when one exists. The
    /// returned report is the user-visible summary; per-item failures are
    /// folded into it rather than surfaced as errors.
    pub async fn run_job(
        &self,
        spec: JobSpec,
        op: Arc<dyn ItemOperation>,
    ) -> Result<JobReport, JobError> {
        spec.retry_policy.validate()?;
        spec.abort_policy.validate()?;
        let job_id = spec.job_id.clone();
        if self
            .registry
            .status(&job_id)
            .is_some_and(|status| !status.is_terminal())
        {
            return Err(JobError::AlreadyRunning { job_id });
        }

        // Resume from the newest checkpoint whose hash validates. Runs
        // before the job is registered so a storage failure leaves no
        // half-started bookkeeping behind.
        let restored = self.store.load_latest(&job_id).await?;

        let cancel = self.cancel_root.child_token();
        let draft_slot: SharedDraft = Arc::new(ParkingMutex::new(None));
        self.effects
            .register_job(&job_id, cancel.clone(), Arc::clone(&draft_slot));
        self.registry.job_started(&job_id);

        let started = Instant::now();
        let started_at = Utc::now();

        let resumed_from = restored.as_ref().map(|doc| doc.sequence);
        let (mut progress, mut recent_errors) = match restored {
            Some(doc) => {
                let progress = ProgressState::resumed(
                    spec.items.iter().cloned(),
                    doc.payload.progress.completed().iter().cloned(),
                    doc.payload.progress.failed().iter().cloned(),
                );
                tracing::info!(
                    target: "crawlweave::runner",
                    job_id = %job_id,
                    sequence = doc.sequence,
                    completed = progress.completed_count(),
                    failed = progress.failed_count(),
                    pending = progress.pending().len(),
                    "resuming job from checkpoint"
                );
                let _ = self.emitter.emit(Event::job(
                    &job_id,
                    JobStage::Resumed,
                    format!("resumed from checkpoint #{}", doc.sequence),
                ));
                (progress, doc.payload.recent_errors)
            }
            None => {
                let _ = self.emitter.emit(Event::job(
                    &job_id,
                    JobStage::Started,
                    format!("job started with {} items", spec.items.len()),
                ));
                (ProgressState::new(spec.items.iter().cloned()), Vec::new())
            }
        };

        let pending_cleanup: Arc<ParkingMutex<Option<CleanupLevel>>> =
            Arc::new(ParkingMutex::new(None));
        let monitor_handle = self.monitor.start(
            spec.threshold.clone(),
            Arc::new(CleanupRelay {
                pending: Arc::clone(&pending_cleanup),
            }),
        );
        let monitor_id = monitor_handle.id();
        self.registry.monitor_started(monitor_id);

        // Seed the snapshot the abort sequence's SaveState reads from.
        *draft_slot.lock() = Some(self.build_draft(&progress, &recent_errors, started));

        // Pending items in submission order, deduplicated.
        let mut queue: VecDeque<ItemId> = {
            let mut seen = FxHashSet::default();
            spec.items
                .iter()
                .filter(|item| progress.pending().contains(*item) && seen.insert((*item).clone()))
                .cloned()
                .collect()
        };

        let mut decisions: Vec<(ItemId, RecoveryAction)> = Vec::new();
        let mut handler_reruns: FxHashMap<ItemId, u32> = FxHashMap::default();
        let mut items_since_checkpoint = 0u32;
        let mut last_checkpoint = Instant::now();

        while let Some(item) = queue.pop_front() {
            if cancel.is_cancelled() {
                queue.push_front(item);
                break;
            }

            // Cleanup runs strictly between items, never mid-flight.
            let requested_cleanup = pending_cleanup.lock().take();
            if let Some(level) = requested_cleanup {
                self.apply_cleanup(&job_id, level, &spec.abort_policy).await;
                if cancel.is_cancelled() {
                    queue.push_front(item);
                    break;
                }
            }

            progress.begin(&item)?;
            let correlation_id = self.id_gen.generate_correlation_id();
            let attempts_seen = Arc::new(AtomicU32::new(0));

            let engine = RetryEngine::new()
                .with_emitter(Arc::clone(&self.emitter))
                .for_item(&job_id, &item, &correlation_id);
            let op_for = Arc::clone(&op);
            let job_for = job_id.clone();
            let item_for = item.clone();
            let corr_for = correlation_id.clone();
            let emitter_for = Arc::clone(&self.emitter);
            let sessions_for = Arc::clone(&self.sessions);
            let cancel_for = cancel.clone();
            let attempts_for = Arc::clone(&attempts_seen);

            let result = engine
                .execute(&spec.retry_policy, &cancel, move |attempt| {
                    attempts_for.store(attempt, Ordering::Relaxed);
                    let ctx = OperationContext {
                        job_id: job_for.clone(),
                        item_id: item_for.clone(),
                        correlation_id: corr_for.clone(),
                        attempt,
                        emitter: Arc::clone(&emitter_for),
                        sessions: Arc::clone(&sessions_for),
                        cancel: cancel_for.clone(),
                    };
                    let op = Arc::clone(&op_for);
                    async move {
                        let item = ctx.item_id.clone();
                        op.run(&item, &ctx).await
                    }
                })
                .await;

            let mut abort_request: Option<String> = None;
            let mut cancelled_mid_item = false;
            match result {
                Ok(_value) => {
                    progress.complete_current()?;
                    self.abort.record_success(&job_id, &spec.abort_policy);
                    let _ = self.emitter.emit(Event::item(
                        &job_id,
                        &item,
                        &correlation_id,
                        ItemOutcome::Succeeded {
                            attempts: attempts_seen.load(Ordering::Relaxed).max(1),
                        },
                        "item completed",
                    ));
                }
                Err(RetryError::Cancelled { .. }) => {
                    progress.release_current()?;
                    cancelled_mid_item = true;
                }
                Err(retry_err) => {
                    let (record, attempt, exhausted) = match retry_err {
                        RetryError::Permanent { attempt, record } => (record, attempt, false),
                        RetryError::MaxRetriesExceeded { attempts, last } => {
                            (last, attempts.len() as u32, true)
                        }
                        RetryError::Cancelled { .. } => unreachable!("handled above"),
                    };
                    let severity = severity_for(&record, exhausted);
                    let mut event =
                        FailureEvent::from_record(record, "operation-runner", correlation_id.clone())
                            .with_severity(severity)
                            .with_context("item", Value::String(item.clone()));
                    let ctx = FailureContext::new(job_id.clone(), correlation_id.clone())
                        .with_item(item.clone())
                        .with_attempt(attempt.max(1), exhausted);
                    let decision = self.failure.handle(
                        &mut event,
                        &ctx,
                        &spec.retry_policy,
                        &spec.abort_policy,
                    );
                    push_recent(&mut recent_errors, event.record.clone());
                    decisions.push((item.clone(), decision.action()));

                    match decision {
                        RecoveryDecision::Skip => {
                            progress.fail_current()?;
                            let _ = self.emitter.emit(Event::item(
                                &job_id,
                                &item,
                                &correlation_id,
                                ItemOutcome::Failed {
                                    action: "skip".into(),
                                },
                                event.message().to_string(),
                            ));
                        }
                        RecoveryDecision::Retry { delay } => {
                            if self.allow_rerun(&mut handler_reruns, &item) {
                                progress.release_current()?;
                                queue.push_back(item.clone());
                                tokio::select! {
                                    _ = cancel.cancelled() => {}
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            } else {
                                progress.fail_current()?;
                            }
                        }
                        RecoveryDecision::Restart { target } => {
                            let retired = match target.as_deref() {
                                Some(session) => {
                                    self.sessions.retire(session);
                                    Some(session.to_string())
                                }
                                None => self.sessions.retire_oldest(),
                            };
                            if let Some(session) = retired {
                                let _ = self.emitter.emit(Event::resource(
                                    "browser_lifetime",
                                    Some("moderate".into()),
                                    format!("session {session} retired for restart"),
                                ));
                            }
                            if self.allow_rerun(&mut handler_reruns, &item) {
                                progress.release_current()?;
                                queue.push_back(item.clone());
                            } else {
                                progress.fail_current()?;
                            }
                        }
                        RecoveryDecision::Abort { reason } => {
                            progress.fail_current()?;
                            abort_request = Some(reason);
                        }
                    }
                }
            }

            // Refresh the read-only snapshot before anything can abort.
            *draft_slot.lock() = Some(self.build_draft(&progress, &recent_errors, started));

            if cancelled_mid_item {
                break;
            }
            if let Some(reason) = abort_request {
                self.abort
                    .execute(&job_id, &spec.abort_policy, AbortReason::Requested { reason })
                    .await;
            } else {
                let _ = self
                    .abort
                    .evaluate_and_execute(&job_id, &spec.abort_policy)
                    .await;
            }
            if cancel.is_cancelled() {
                break;
            }

            items_since_checkpoint += 1;
            if items_since_checkpoint >= self.config.checkpoint_every_items
                || last_checkpoint.elapsed() >= self.config.checkpoint_every
            {
                let draft = self.build_draft(&progress, &recent_errors, started);
                if let Err(err) = self.store.create(&job_id, draft).await {
                    tracing::warn!(
                        target: "crawlweave::runner",
                        job_id = %job_id,
                        %err,
                        "periodic checkpoint failed; continuing"
                    );
                }
                items_since_checkpoint = 0;
                last_checkpoint = Instant::now();
            }
        }

        // Outcome: an executed abort wins over plain cancellation.
        let outcome = if let Some(reason) = self.abort.aborted(&job_id) {
            JobOutcome::Aborted {
                reason: reason.to_string(),
            }
        } else if cancel.is_cancelled() {
            JobOutcome::Cancelled
        } else {
            JobOutcome::Completed
        };

        // Final checkpoint. The abort path already wrote one through
        // SaveState, but progress may have moved since.
        let final_draft = self.build_draft(&progress, &recent_errors, started);
        *draft_slot.lock() = Some(final_draft.clone());
        if let Err(err) = self.store.create(&job_id, final_draft).await {
            tracing::error!(
                target: "crawlweave::runner",
                job_id = %job_id,
                %err,
                "final checkpoint failed"
            );
        }

        ResourceMonitor::stop(monitor_handle).await;
        self.registry.monitor_stopped(monitor_id);
        self.effects.deregister_job(&job_id);
        self.abort.forget(&job_id);

        let (status, stage) = match &outcome {
            JobOutcome::Completed => (
                JobStatus::Completed { at: Utc::now() },
                JobStage::Completed,
            ),
            JobOutcome::Aborted { reason } => (
                JobStatus::Aborted {
                    at: Utc::now(),
                    reason: reason.clone(),
                },
                JobStage::Aborted,
            ),
            JobOutcome::Cancelled => (
                JobStatus::Cancelled { at: Utc::now() },
                JobStage::Cancelled,
            ),
        };
        self.registry.set_status(&job_id, status);
        let _ = self
            .emitter
            .emit(Event::job(&job_id, stage, outcome.to_string()));

        let report = JobReport {
            job_id: job_id.clone(),
            outcome,
            total_items: progress.total(),
            completed: progress.completed_count(),
            failed: progress.failed_count(),
            pending: progress.pending().len(),
            decisions,
            resumed_from,
            started_at,
            duration: started.elapsed(),
        };
        tracing::info!(
            target: "crawlweave::runner",
            job_id = %job_id,
            summary = %report.summary(),
            "job finished"
        );
        Ok(report)
    }

    /// A handler-driven re-run (Retry/Restart after the retry budget) is
    /// honored once per item; after that the item fails for good.
    fn allow_rerun(&self, reruns: &mut FxHashMap<ItemId, u32>, item: &str) -> bool {
        let count = reruns.entry(item.to_string()).or_insert(0);
        if *count == 0 {
            *count += 1;
            true
        } else {
            false
        }
    }

    async fn apply_cleanup(&self, job_id: &str, level: CleanupLevel, policy: &AbortPolicy) {
        tracing::info!(
            target: "crawlweave::runner",
            job_id,
            level = level.as_str(),
            "applying cleanup between items"
        );
        match level {
            CleanupLevel::Gentle => {
                // Idle-tab and cache cleanup belongs to the automation
                // layer; signal it through the bus.
                let _ = self.emitter.emit(Event::resource(
                    "cleanup",
                    Some("gentle".into()),
                    "gentle cleanup requested",
                ));
            }
            CleanupLevel::Moderate => {
                if let Some(session) = self.sessions.retire_oldest() {
                    let _ = self.emitter.emit(Event::resource(
                        "cleanup",
                        Some("moderate".into()),
                        format!("oldest browser session {session} retired"),
                    ));
                }
            }
            CleanupLevel::Aggressive => {
                let retired = self.sessions.retire_all();
                let _ = self.emitter.emit(Event::resource(
                    "cleanup",
                    Some("aggressive".into()),
                    format!("{} browser sessions retired", retired.len()),
                ));
            }
            CleanupLevel::Force => {
                self.abort
                    .execute(
                        job_id,
                        policy,
                        AbortReason::Requested {
                            reason: "resource exhaustion reached force level".to_string(),
                        },
                    )
                    .await;
            }
        }
    }

    fn build_draft(
        &self,
        progress: &ProgressState,
        recent_errors: &[ErrorRecord],
        started: Instant,
    ) -> CheckpointDraft {
        CheckpointDraft::new(progress.clone(), self.monitor.latest_snapshot())
            .with_browser_sessions(self.sessions.session_ids())
            .with_recent_errors(recent_errors.to_vec())
            .with_processing_time(started.elapsed().as_secs_f64())
    }
}

fn push_recent(errors: &mut Vec<ErrorRecord>, record: ErrorRecord) {
    if errors.len() == RECENT_ERRORS_CAP {
        errors.remove(0);
    }
    errors.push(record);
}

/// Severity for a terminal failure: an explicit hint in the record's
/// details wins, an exhausted retry budget escalates to High, everything
/// else is Medium.
fn severity_for(record: &ErrorRecord, exhausted: bool) -> Severity {
    match record.details.get("severity").and_then(Value::as_str) {
        Some("critical") => Severity::Critical,
        Some("high") => Severity::High,
        Some("medium") => Severity::Medium,
        Some("low") => Severity::Low,
        _ if exhausted => Severity::High,
        _ => Severity::Medium,
    }
}
