use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use tempfile::TempDir;

use crawlweave::abort::AbortPolicy;
use crawlweave::failure::{ErrorRecord, RecoveryAction};
use crawlweave::monitor::ResourceThreshold;
use crawlweave::retry::RetryPolicy;
use crawlweave::runtimes::{
    CoreConfig, EventBusConfig, JobOutcome, JobRunner, JobSpec, JobStatus, OperationContext,
};

fn config(root: &Path) -> CoreConfig {
    CoreConfig::default()
        .with_storage_root(root)
        .with_retention(10)
        .with_checkpoint_cadence(1, Duration::from_secs(3600))
        .with_monitoring_interval(Duration::from_millis(25))
        .with_event_bus(EventBusConfig::silent())
}

fn items(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/p/{i:03}")).collect()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::standard()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(4))
        .with_jitter(0.25)
}

/// Transient storm within budget: every item fails three times with a
/// network timeout, then succeeds. All items complete and the total retry
/// count is items × 3.
#[tokio::test]
async fn transient_storm_within_budget() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(config(dir.path()));

    let attempts: Arc<Mutex<FxHashMap<String, u32>>> = Arc::new(Mutex::new(FxHashMap::default()));
    let attempts_op = Arc::clone(&attempts);
    let op = Arc::new(move |item: String, _ctx: OperationContext| {
        let attempts = Arc::clone(&attempts_op);
        async move {
            let n = {
                let mut map = attempts.lock();
                let n = map.entry(item.clone()).or_insert(0);
                *n += 1;
                *n
            };
            if n <= 3 {
                Err(ErrorRecord::new("network.timeout", "storm"))
            } else {
                Ok(json!({"item": item}))
            }
        }
    });

    let spec = JobSpec::new("storm", items(10)).with_retry_policy(fast_retry(5));
    let report = runner.run_job(spec, op).await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.completed, 10);
    assert_eq!(report.failed, 0);

    let total_attempts: u32 = attempts.lock().values().sum();
    // 4 attempts per item = 3 retries each, 30 retries in total.
    assert_eq!(total_attempts, 40);
    assert!(matches!(
        runner.status("storm"),
        Some(JobStatus::Completed { .. })
    ));
}

/// Permanent failure skip: a 404 is classified permanent, the item lands in
/// failed, and the job still finishes the rest.
#[tokio::test]
async fn permanent_failure_skips_the_item_and_continues() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(config(dir.path()));

    let op = Arc::new(|item: String, _ctx: OperationContext| async move {
        if item.ends_with("003") {
            Err(ErrorRecord::new("http.fetch", "not found").with_status(404))
        } else {
            Ok(json!({"item": item}))
        }
    });

    let spec = JobSpec::new("skips", items(6)).with_retry_policy(fast_retry(5));
    let report = runner.run_job(spec, op).await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.completed, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(report.decisions.len(), 1);
    let (failed_item, action) = &report.decisions[0];
    assert!(failed_item.ends_with("003"));
    assert_eq!(*action, RecoveryAction::Skip);
}

/// Abort on systemic failures: 80% failure rate over a 10-outcome window
/// with a 10-operation grace period. The abort fires after at least 10 and
/// at most 20 processed items, writes a final checkpoint, and surfaces the
/// rate in the reason.
#[tokio::test]
async fn abort_fires_on_sustained_failure_rate() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(config(dir.path()));

    let op = Arc::new(|item: String, _ctx: OperationContext| async move {
        let index: usize = item[item.len() - 3..].parse().unwrap();
        if index % 5 == 0 {
            Ok(json!({"item": item}))
        } else {
            Err(ErrorRecord::new("network.timeout", "origin is down"))
        }
    });

    let abort_policy = AbortPolicy {
        failure_rate_threshold: 0.5,
        window_size: 10,
        window_duration_secs: 600,
        max_consecutive_crashes: 100,
        min_operations: 10,
        ..Default::default()
    };
    let spec = JobSpec::new("doomed", items(100))
        .with_retry_policy(fast_retry(1))
        .with_abort_policy(abort_policy);
    let report = runner.run_job(spec, op).await.unwrap();

    match &report.outcome {
        JobOutcome::Aborted { reason } => {
            assert!(reason.contains("failure rate"), "reason: {reason}");
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    let processed = report.completed + report.failed;
    assert!(
        (10..=20).contains(&processed),
        "abort fired after {processed} items"
    );
    assert!(report.pending > 0);

    // A final checkpoint exists and resumes cleanly.
    let latest = runner.store().load_latest("doomed").await.unwrap().unwrap();
    assert_eq!(
        latest.metadata.completed_items as usize + latest.metadata.failed_items as usize,
        processed
    );
    assert!(matches!(
        runner.status("doomed"),
        Some(JobStatus::Aborted { .. })
    ));
}

/// Recovery from a mid-run stop: cancel after five completed items, then
/// resume with a fresh runner over the same storage root. Only the
/// remaining items are re-processed and the final state is fully complete.
#[tokio::test]
async fn resume_continues_from_the_latest_checkpoint() {
    let dir = TempDir::new().unwrap();

    let runner = Arc::new(JobRunner::new(config(dir.path())));
    let runner_op = Arc::clone(&runner);
    let completed = Arc::new(AtomicU32::new(0));
    let completed_op = Arc::clone(&completed);
    let op = Arc::new(move |_item: String, _ctx: OperationContext| {
        let runner = Arc::clone(&runner_op);
        let completed = Arc::clone(&completed_op);
        async move {
            if completed.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                // Simulates the process dying after the fifth item.
                runner.cancel("resumable");
            }
            Ok(json!({}))
        }
    });

    let spec = JobSpec::new("resumable", items(10)).with_retry_policy(fast_retry(3));
    let first = runner.run_job(spec.clone(), op).await.unwrap();
    assert_eq!(first.outcome, JobOutcome::Cancelled);
    assert_eq!(first.completed, 5);
    assert_eq!(first.pending, 5);

    // A new runner over the same root picks the checkpoint up.
    let second_runner = JobRunner::new(config(dir.path()));
    let reruns = Arc::new(AtomicU32::new(0));
    let reruns_op = Arc::clone(&reruns);
    let op2 = Arc::new(move |_item: String, _ctx: OperationContext| {
        let reruns = Arc::clone(&reruns_op);
        async move {
            reruns.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    });
    let second = second_runner.run_job(spec, op2).await.unwrap();

    assert_eq!(second.outcome, JobOutcome::Completed);
    assert!(second.resumed_from.is_some());
    assert_eq!(second.completed, 10);
    assert_eq!(second.failed, 0);
    // Only the unfinished half ran again.
    assert_eq!(reruns.load(Ordering::SeqCst), 5);
}

/// Corrupted checkpoint fallback: flip a byte in the newest checkpoint and
/// resume. The previous checkpoint drives the resume, the corrupted file is
/// retained with a marker, and the re-run covers the extra item the stale
/// checkpoint did not know about.
#[tokio::test]
async fn resume_falls_back_past_a_corrupted_checkpoint() {
    let dir = TempDir::new().unwrap();

    let runner = Arc::new(JobRunner::new(config(dir.path())));
    let runner_op = Arc::clone(&runner);
    let completed = Arc::new(AtomicU32::new(0));
    let completed_op = Arc::clone(&completed);
    let op = Arc::new(move |_item: String, _ctx: OperationContext| {
        let runner = Arc::clone(&runner_op);
        let completed = Arc::clone(&completed_op);
        async move {
            if completed.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                runner.cancel("fallback");
            }
            Ok(json!({}))
        }
    });
    let spec = JobSpec::new("fallback", items(10)).with_retry_policy(fast_retry(3));
    let first = runner.run_job(spec.clone(), op).await.unwrap();
    assert_eq!(first.completed, 5);

    // Corrupt the newest checkpoint file.
    let job_dir = dir.path().join("fallback");
    let newest = fs::read_dir(&job_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "ckpt"))
        .max_by_key(|p| p.file_name().unwrap().to_os_string())
        .unwrap();
    let mut bytes = fs::read(&newest).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    fs::write(&newest, &bytes).unwrap();

    let second_runner = JobRunner::new(config(dir.path()));
    let reruns = Arc::new(AtomicU32::new(0));
    let reruns_op = Arc::clone(&reruns);
    let op2 = Arc::new(move |_item: String, _ctx: OperationContext| {
        let reruns = Arc::clone(&reruns_op);
        async move {
            reruns.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    });
    let second = second_runner.run_job(spec, op2).await.unwrap();

    assert_eq!(second.outcome, JobOutcome::Completed);
    assert_eq!(second.completed, 10);
    // The fallback checkpoint knew 4 completed items, so 6 ran again
    // (at-least-once semantics for the item the lost checkpoint covered).
    assert_eq!(reruns.load(Ordering::SeqCst), 6);

    // The corrupted file is retained, marked by its sidecar.
    assert!(newest.exists());
    let marker = newest.with_file_name(format!(
        "{}.corrupt",
        newest.file_name().unwrap().to_str().unwrap()
    ));
    assert!(marker.exists());
}

/// Browser-lifetime breach: a session older than the limit is recycled at
/// an item boundary while the job keeps running to completion.
#[tokio::test]
async fn stale_browser_session_is_recycled_between_items() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(config(dir.path()));

    runner.sessions().register("sess-old");
    assert_eq!(runner.sessions().len(), 1);

    let op = Arc::new(|_item: String, _ctx: OperationContext| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({}))
    });

    let threshold = ResourceThreshold {
        browser_lifetime_secs: Some(0),
        ..Default::default()
    };
    let spec = JobSpec::new("recycle", items(30))
        .with_retry_policy(fast_retry(2))
        .with_threshold(threshold);
    let report = runner.run_job(spec, op).await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.completed, 30);
    // The stale session was retired strictly between items.
    assert!(!runner.sessions().session_ids().contains(&"sess-old".to_string()));
}

/// Submitting a spec with an invalid policy fails fast, before any item
/// runs.
#[tokio::test]
async fn invalid_policies_are_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(config(dir.path()));

    let op = Arc::new(|_item: String, _ctx: OperationContext| async move { Ok(json!({})) });
    let spec = JobSpec::new("invalid", items(3))
        .with_retry_policy(RetryPolicy::standard().with_max_attempts(0));

    assert!(runner.run_job(spec, op).await.is_err());
}
