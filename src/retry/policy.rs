use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classifier::FailureClassifier;

/// Bounds enforced by [`RetryPolicy::validate`].
pub const MAX_ATTEMPTS_CEILING: u32 = 100;
pub const MULTIPLIER_RANGE: (f64, f64) = (1.0, 10.0);

/// Errors from retry-policy validation.
#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("policy `{name}`: max_attempts {value} outside 1..={MAX_ATTEMPTS_CEILING}")]
    #[diagnostic(code(crawlweave::retry::max_attempts))]
    MaxAttempts { name: String, value: u32 },

    #[error("policy `{name}`: multiplier {value} outside {:?}", MULTIPLIER_RANGE)]
    #[diagnostic(
        code(crawlweave::retry::multiplier),
        help("use 1.0 for fixed delays, up to 10.0 for steep exponential backoff")
    )]
    Multiplier { name: String, value: f64 },

    #[error("policy `{name}`: jitter {value} outside 0.0..=1.0")]
    #[diagnostic(code(crawlweave::retry::jitter))]
    Jitter { name: String, value: f64 },

    #[error("policy `{name}`: max_delay_ms {max} is below base_delay_ms {base}")]
    #[diagnostic(code(crawlweave::retry::delay_bounds))]
    DelayBounds { name: String, base: u64, max: u64 },
}

/// Named, immutable retry policy.
///
/// Loaded once from configuration and shared; the engine never mutates it.
/// Delays are stored in milliseconds so policies stay trivially
/// serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub name: String,
    /// Maximum attempts including the initial one, 1..=100.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Multiplier applied per retry, 1.0..=10.0.
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Jitter factor J; each delay is scaled by a uniform draw from
    /// `[1 - J, 1 + J]`. Mandatory: correlated failures must not retry in
    /// lockstep.
    pub jitter: f64,
    pub classifier: FailureClassifier,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: 0.25,
            classifier: FailureClassifier::scraping_defaults(),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the documented field ranges.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(PolicyError::MaxAttempts {
                name: self.name.clone(),
                value: self.max_attempts,
            });
        }
        if self.multiplier < MULTIPLIER_RANGE.0 || self.multiplier > MULTIPLIER_RANGE.1 {
            return Err(PolicyError::Multiplier {
                name: self.name.clone(),
                value: self.multiplier,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PolicyError::Jitter {
                name: self.name.clone(),
                value: self.jitter,
            });
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PolicyError::DelayBounds {
                name: self.name.clone(),
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Single attempt, no backoff. For operations that are cheaper to fail
    /// than to repeat.
    #[must_use]
    pub fn none() -> Self {
        Self::new("none").with_max_attempts(1)
    }

    /// The default for page fetches: 5 attempts, 500 ms doubling, jittered.
    #[must_use]
    pub fn standard() -> Self {
        Self::new("standard")
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(500))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.25)
    }

    /// Fast, dense retries for cheap idempotent calls.
    #[must_use]
    pub fn aggressive() -> Self {
        Self::new("aggressive")
            .with_max_attempts(8)
            .with_base_delay(Duration::from_millis(200))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(0.5)
    }

    /// Few, widely spaced attempts for rate-limited targets.
    #[must_use]
    pub fn patient() -> Self {
        Self::new("patient")
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(2))
            .with_multiplier(3.0)
            .with_max_delay(Duration::from_secs(120))
            .with_jitter(0.25)
    }

    /// Resolve a preset by name, used when policies are referenced from
    /// configuration.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::none()),
            "standard" => Some(Self::standard()),
            "aggressive" => Some(Self::aggressive()),
            "patient" => Some(Self::patient()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for name in ["none", "standard", "aggressive", "patient"] {
            let policy = RetryPolicy::preset(name).unwrap();
            policy.validate().unwrap();
            assert_eq!(policy.name, name);
        }
        assert!(RetryPolicy::preset("bogus").is_none());
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        assert!(RetryPolicy::new("a").with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::new("b").with_max_attempts(101).validate().is_err());
        assert!(RetryPolicy::new("c").with_multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::new("d").with_multiplier(11.0).validate().is_err());
        assert!(RetryPolicy::new("e").with_jitter(1.5).validate().is_err());
        assert!(
            RetryPolicy::new("f")
                .with_base_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
