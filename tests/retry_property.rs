use std::time::Duration;

use proptest::prelude::*;

use crawlweave::retry::{RetryEngine, RetryPolicy};

proptest! {
    /// Every produced delay satisfies
    /// `base·(1−J) ≤ d ≤ max·(1+J)` for any valid policy and retry index.
    #[test]
    fn backoff_delays_stay_inside_the_documented_bounds(
        base_ms in 1u64..5_000,
        multiplier in 1.0f64..10.0,
        max_ms in 5_000u64..120_000,
        jitter in 0.0f64..1.0,
        retry in 1u32..40,
    ) {
        let policy = RetryPolicy::new("prop")
            .with_base_delay(Duration::from_millis(base_ms))
            .with_multiplier(multiplier)
            .with_max_delay(Duration::from_millis(max_ms))
            .with_jitter(jitter);
        policy.validate().unwrap();

        let delay = RetryEngine::backoff_delay(&policy, retry).as_millis() as f64;
        let floor = (base_ms as f64) * (1.0 - jitter);
        let ceil = (max_ms as f64) * (1.0 + jitter);
        // Truncation to whole milliseconds can undercut the floor by < 1ms.
        prop_assert!(delay + 1.0 >= floor, "delay {delay} under floor {floor}");
        prop_assert!(delay <= ceil, "delay {delay} over ceiling {ceil}");
    }

    /// Without jitter the sequence is monotone until it hits the cap.
    #[test]
    fn unjittered_backoff_is_monotone(
        base_ms in 1u64..1_000,
        multiplier in 1.0f64..10.0,
        max_ms in 1_000u64..60_000,
    ) {
        let policy = RetryPolicy::new("prop")
            .with_base_delay(Duration::from_millis(base_ms))
            .with_multiplier(multiplier)
            .with_max_delay(Duration::from_millis(max_ms))
            .with_jitter(0.0);

        let mut previous = Duration::ZERO;
        for retry in 1..12 {
            let delay = RetryEngine::backoff_delay(&policy, retry);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            previous = delay;
        }
    }
}
