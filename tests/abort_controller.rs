use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crawlweave::abort::{
    AbortAction, AbortController, AbortEffects, AbortPolicy, AbortReason, AbortStep, NoopEffects,
};
use crawlweave::failure::{ErrorRecord, FailureCategory, FailureEvent, Severity};

fn failure(category: FailureCategory, severity: Severity) -> FailureEvent {
    FailureEvent::new(
        category,
        severity,
        "operation-runner",
        ErrorRecord::new("network.timeout", "boom"),
        "corr-1",
    )
}

fn policy(window: usize, min_ops: usize) -> AbortPolicy {
    AbortPolicy {
        failure_rate_threshold: 0.5,
        window_size: window,
        window_duration_secs: 600,
        max_consecutive_crashes: 3,
        min_operations: min_ops,
        ..Default::default()
    }
}

#[derive(Default)]
struct CountingEffects {
    saves: AtomicU32,
    cleanups: AtomicU32,
    shutdowns: AtomicU32,
}

#[async_trait]
impl AbortEffects for CountingEffects {
    async fn save_state(&self, _job_id: &str) -> Result<(), ErrorRecord> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self, _job_id: &str, _target: Option<&str>) -> Result<(), ErrorRecord> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _job_id: &str) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn no_abort_during_the_grace_period() {
    let controller = AbortController::new(Arc::new(NoopEffects));
    let policy = policy(10, 10);

    // 9 straight failures: rate 1.0, but below min_operations.
    for _ in 0..9 {
        controller.record_failure(
            "job-1",
            &policy,
            &failure(FailureCategory::Network, Severity::Medium),
        );
    }
    assert!(!controller.evaluate("job-1", &policy).abort);

    // The 10th outcome ends the grace period.
    controller.record_failure(
        "job-1",
        &policy,
        &failure(FailureCategory::Network, Severity::Medium),
    );
    let evaluation = controller.evaluate("job-1", &policy);
    assert!(evaluation.abort);
    assert!(matches!(
        evaluation.reason,
        Some(AbortReason::FailureRate { .. })
    ));
}

#[tokio::test]
async fn failure_rate_is_computed_over_the_ring_only() {
    let controller = AbortController::new(Arc::new(NoopEffects));
    let policy = policy(10, 5);

    // 5 early failures followed by 10 successes: the failures have scrolled
    // out of the ring, so the rate is 0.
    for _ in 0..5 {
        controller.record_failure(
            "job-1",
            &policy,
            &failure(FailureCategory::Network, Severity::Medium),
        );
    }
    for _ in 0..10 {
        controller.record_success("job-1", &policy);
    }
    assert!(!controller.evaluate("job-1", &policy).abort);
}

#[tokio::test]
async fn consecutive_browser_crashes_trip_the_abort() {
    let controller = AbortController::new(Arc::new(NoopEffects));
    let policy = AbortPolicy {
        max_consecutive_crashes: 3,
        min_operations: 3,
        // Rate trigger effectively off so the crash trigger is isolated.
        failure_rate_threshold: 1.0,
        ..policy(20, 3)
    };

    for _ in 0..6 {
        controller.record_success("job-1", &policy);
    }
    controller.record_failure(
        "job-1",
        &policy,
        &failure(FailureCategory::Browser, Severity::High),
    );
    controller.record_failure(
        "job-1",
        &policy,
        &failure(FailureCategory::System, Severity::High),
    );
    assert!(!controller.evaluate("job-1", &policy).abort);

    controller.record_failure(
        "job-1",
        &policy,
        &failure(FailureCategory::Browser, Severity::High),
    );
    let evaluation = controller.evaluate("job-1", &policy);
    assert!(evaluation.abort);
    assert!(matches!(
        evaluation.reason,
        Some(AbortReason::ConsecutiveCrashes { count: 3 })
    ));
}

#[tokio::test]
async fn critical_failures_bypass_the_grace_period() {
    let controller = AbortController::new(Arc::new(NoopEffects));
    let policy = policy(10, 10);

    controller.record_failure(
        "job-1",
        &policy,
        &failure(FailureCategory::Application, Severity::Critical),
    );
    let evaluation = controller.evaluate("job-1", &policy);
    assert!(evaluation.abort);
    assert!(matches!(
        evaluation.reason,
        Some(AbortReason::CriticalFailure { .. })
    ));
}

#[tokio::test]
async fn execute_runs_each_action_exactly_once() {
    let effects = Arc::new(CountingEffects::default());
    let controller = AbortController::new(effects.clone());
    let policy = AbortPolicy::default();

    // Call execute several times; the abort sequence must run once.
    for _ in 0..4 {
        controller
            .execute(
                "job-1",
                &policy,
                AbortReason::Requested {
                    reason: "test".into(),
                },
            )
            .await;
    }

    assert_eq!(effects.saves.load(Ordering::SeqCst), 1);
    assert_eq!(effects.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(effects.shutdowns.load(Ordering::SeqCst), 1);
    assert!(controller.aborted("job-1").is_some());

    // Other jobs are unaffected.
    assert!(controller.aborted("job-2").is_none());
}

struct HangingSave {
    shutdowns: AtomicU32,
}

#[async_trait]
impl AbortEffects for HangingSave {
    async fn save_state(&self, _job_id: &str) -> Result<(), ErrorRecord> {
        // Far beyond the step timeout.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn cleanup(&self, _job_id: &str, _target: Option<&str>) -> Result<(), ErrorRecord> {
        Ok(())
    }

    async fn shutdown(&self, _job_id: &str) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn a_timed_out_action_does_not_block_the_rest() {
    let effects = Arc::new(HangingSave {
        shutdowns: AtomicU32::new(0),
    });
    let controller = AbortController::new(effects.clone());
    let policy = AbortPolicy {
        actions: vec![
            AbortStep::new(AbortAction::SaveState).with_timeout(Duration::from_millis(20)),
            AbortStep::new(AbortAction::Shutdown),
        ],
        ..AbortPolicy::default()
    };

    controller
        .execute(
            "job-1",
            &policy,
            AbortReason::Requested {
                reason: "test".into(),
            },
        )
        .await;

    // SaveState hung and was abandoned; Shutdown still ran.
    assert_eq!(effects.shutdowns.load(Ordering::SeqCst), 1);
}
