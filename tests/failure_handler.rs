use std::sync::Arc;
use std::time::Duration;

use crawlweave::abort::{AbortController, AbortPolicy, NoopEffects};
use crawlweave::failure::{
    ErrorRecord, FailureCategory, FailureContext, FailureEvent, FailureHandler, RecoveryAction,
    RecoveryDecision, Severity,
};
use crawlweave::retry::{FailureClassifier, MatchRule, RetryPolicy};

fn wiring() -> (Arc<AbortController>, FailureHandler) {
    let abort = Arc::new(AbortController::new(Arc::new(NoopEffects)));
    let handler = FailureHandler::new(Arc::clone(&abort));
    (abort, handler)
}

fn network_event(message: &str) -> FailureEvent {
    FailureEvent::from_record(
        ErrorRecord::new("network.timeout", message),
        "operation-runner",
        "corr-7",
    )
}

#[test]
fn terminal_failures_enter_the_abort_window_once() {
    let (abort, handler) = wiring();
    let policy = RetryPolicy::standard();
    let abort_policy = AbortPolicy::default();

    // Transient with budget left: not terminal, not recorded.
    let ctx = FailureContext::new("job-1", "corr-7").with_attempt(2, false);
    handler.handle(&mut network_event("mid-retry"), &ctx, &policy, &abort_policy);
    assert_eq!(abort.recorded("job-1"), 0);

    // Exhausted: recorded.
    let ctx = FailureContext::new("job-1", "corr-7").with_attempt(5, true);
    handler.handle(&mut network_event("exhausted"), &ctx, &policy, &abort_policy);
    assert_eq!(abort.recorded("job-1"), 1);

    // Permanent: recorded even with attempts nominally left.
    let policy_404 = RetryPolicy::standard().with_classifier(
        FailureClassifier::new().with_non_retryable_status(404),
    );
    let mut event = FailureEvent::from_record(
        ErrorRecord::new("http.fetch", "not found").with_status(404),
        "operation-runner",
        "corr-8",
    );
    let ctx = FailureContext::new("job-1", "corr-8").with_attempt(1, false);
    let decision = handler.handle(&mut event, &ctx, &policy_404, &abort_policy);
    assert_eq!(decision, RecoveryDecision::Skip);
    assert_eq!(abort.recorded("job-1"), 2);
}

#[test]
fn retry_decisions_carry_a_bounded_delay() {
    let (_, handler) = wiring();
    let policy = RetryPolicy::new("bounded")
        .with_max_attempts(5)
        .with_base_delay(Duration::from_millis(100))
        .with_multiplier(2.0)
        .with_max_delay(Duration::from_millis(800))
        .with_jitter(0.25);

    let ctx = FailureContext::new("job-1", "corr-7").with_attempt(2, false);
    match handler.handle(
        &mut network_event("again"),
        &ctx,
        &policy,
        &AbortPolicy::default(),
    ) {
        RecoveryDecision::Retry { delay } => {
            // attempt 2 → base·2 = 200ms, jittered ±25%.
            assert!(delay >= Duration::from_millis(150));
            assert!(delay <= Duration::from_millis(250));
        }
        other => panic!("expected Retry, got {other:?}"),
    }
}

#[test]
fn custom_handler_can_reroute_browser_failures_to_restart() {
    let (_, mut handler) = wiring();
    handler.register(
        FailureCategory::Browser,
        Arc::new(|event: &FailureEvent, _: &FailureContext| {
            event
                .record
                .kind
                .contains("browser.crash")
                .then_some(RecoveryDecision::Restart { target: None })
        }),
    );

    let mut event = FailureEvent::from_record(
        ErrorRecord::new("browser.crash", "renderer died"),
        "operation-runner",
        "corr-9",
    );
    let ctx = FailureContext::new("job-1", "corr-9").with_attempt(5, true);
    let decision = handler.handle(
        &mut event,
        &ctx,
        &RetryPolicy::standard(),
        &AbortPolicy::default(),
    );
    assert_eq!(decision, RecoveryDecision::Restart { target: None });
    assert_eq!(event.action, Some(RecoveryAction::Restart));
}

#[test]
fn critical_severity_aborts_even_when_a_classifier_says_transient() {
    let (_, handler) = wiring();
    let mut event = network_event("meltdown");
    event = event.with_severity(Severity::Critical);
    let ctx = FailureContext::new("job-1", "corr-7").with_attempt(1, false);

    let decision = handler.handle(
        &mut event,
        &ctx,
        &RetryPolicy::standard(),
        &AbortPolicy::default(),
    );
    assert!(matches!(decision, RecoveryDecision::Abort { .. }));
}

#[test]
fn handler_rules_can_turn_transient_kinds_permanent() {
    let (_, handler) = wiring();
    // Message rule outranks the retryable status code.
    let policy = RetryPolicy::standard().with_classifier(
        FailureClassifier::new()
            .with_permanent(MatchRule::message("captcha"))
            .with_retryable_status(503),
    );

    let mut event = FailureEvent::from_record(
        ErrorRecord::new("network.blocked", "captcha interstitial served").with_status(503),
        "operation-runner",
        "corr-7",
    );
    let ctx = FailureContext::new("job-1", "corr-7").with_attempt(1, false);
    let decision = handler.handle(&mut event, &ctx, &policy, &AbortPolicy::default());
    assert_eq!(decision, RecoveryDecision::Skip);
}
