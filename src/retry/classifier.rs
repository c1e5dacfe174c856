use serde::{Deserialize, Serialize};

use crate::failure::ErrorRecord;

/// Verdict of failure classification: may the operation be retried?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Transient,
    Permanent,
}

impl Verdict {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Verdict::Transient)
    }
}

/// One pattern over an error record.
///
/// A rule matches when every populated field matches: `kind` and `message`
/// are case-insensitive substring patterns. A rule with no fields populated
/// matches nothing, so an accidentally empty rule can never blanket-classify
/// every failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MatchRule {
    pub fn kind(pattern: impl Into<String>) -> Self {
        Self {
            kind: Some(pattern.into()),
            message: None,
        }
    }

    pub fn message(pattern: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: Some(pattern.into()),
        }
    }

    fn matches(&self, record: &ErrorRecord) -> bool {
        if self.kind.is_none() && self.message.is_none() {
            return false;
        }
        let kind_ok = self.kind.as_ref().is_none_or(|p| contains_ci(&record.kind, p));
        let message_ok = self
            .message
            .as_ref()
            .is_none_or(|p| contains_ci(&record.message, p));
        kind_ok && message_ok
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

/// Ordered failure classifier.
///
/// Evaluation order is fixed: explicit permanent rules, then explicit
/// transient rules, then non-retryable status codes, then retryable status
/// codes, and finally the transient default. Classification is a pure
/// function of the record and the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureClassifier {
    #[serde(default)]
    pub permanent: Vec<MatchRule>,
    #[serde(default)]
    pub transient: Vec<MatchRule>,
    #[serde(default)]
    pub non_retryable_status: Vec<u16>,
    #[serde(default)]
    pub retryable_status: Vec<u16>,
}

impl FailureClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_permanent(mut self, rule: MatchRule) -> Self {
        self.permanent.push(rule);
        self
    }

    #[must_use]
    pub fn with_transient(mut self, rule: MatchRule) -> Self {
        self.transient.push(rule);
        self
    }

    #[must_use]
    pub fn with_non_retryable_status(mut self, status: u16) -> Self {
        self.non_retryable_status.push(status);
        self
    }

    #[must_use]
    pub fn with_retryable_status(mut self, status: u16) -> Self {
        self.retryable_status.push(status);
        self
    }

    /// Classify a failure record.
    pub fn classify(&self, record: &ErrorRecord) -> Verdict {
        if self.permanent.iter().any(|rule| rule.matches(record)) {
            return Verdict::Permanent;
        }
        if self.transient.iter().any(|rule| rule.matches(record)) {
            return Verdict::Transient;
        }
        if let Some(status) = record.status {
            if self.non_retryable_status.contains(&status) {
                return Verdict::Permanent;
            }
            if self.retryable_status.contains(&status) {
                return Verdict::Transient;
            }
        }
        Verdict::Transient
    }

    /// Classifier used by the built-in presets: auth denials, not-found, and
    /// malformed-input parses are permanent; timeouts, rate limits, and
    /// gateway hiccups are transient.
    #[must_use]
    pub fn scraping_defaults() -> Self {
        Self::new()
            .with_permanent(MatchRule::kind("auth"))
            .with_permanent(MatchRule::kind("parse.malformed"))
            .with_transient(MatchRule::kind("network"))
            .with_transient(MatchRule::kind("timeout"))
            .with_transient(MatchRule::kind("browser.rpc"))
            .with_transient(MatchRule::message("rate limit"))
            .with_non_retryable_status(400)
            .with_non_retryable_status(401)
            .with_non_retryable_status(403)
            .with_non_retryable_status(404)
            .with_retryable_status(408)
            .with_retryable_status(429)
            .with_retryable_status(500)
            .with_retryable_status(502)
            .with_retryable_status(503)
            .with_retryable_status(504)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str, message: &str) -> ErrorRecord {
        ErrorRecord::new(kind, message)
    }

    #[test]
    fn permanent_rules_win_over_transient_rules() {
        let classifier = FailureClassifier::new()
            .with_permanent(MatchRule::kind("network.blocked"))
            .with_transient(MatchRule::kind("network"));
        assert_eq!(
            classifier.classify(&record("network.blocked", "captcha wall")),
            Verdict::Permanent
        );
        assert_eq!(
            classifier.classify(&record("network.timeout", "slow")),
            Verdict::Transient
        );
    }

    #[test]
    fn explicit_rules_win_over_status_codes() {
        let classifier = FailureClassifier::new()
            .with_transient(MatchRule::kind("http"))
            .with_non_retryable_status(404);
        // 404 would be permanent by status, but the kind rule fires first.
        assert_eq!(
            classifier.classify(&record("http.fetch", "not found").with_status(404)),
            Verdict::Transient
        );
    }

    #[test]
    fn status_codes_apply_when_no_rule_matches() {
        let classifier = FailureClassifier::scraping_defaults();
        assert_eq!(
            classifier.classify(&record("http.fetch", "gone").with_status(404)),
            Verdict::Permanent
        );
        assert_eq!(
            classifier.classify(&record("http.fetch", "busy").with_status(503)),
            Verdict::Transient
        );
    }

    #[test]
    fn default_is_transient() {
        let classifier = FailureClassifier::new();
        assert_eq!(
            classifier.classify(&record("something.unknown", "???")),
            Verdict::Transient
        );
    }

    #[test]
    fn empty_rule_matches_nothing() {
        let classifier = FailureClassifier::new().with_permanent(MatchRule::default());
        assert_eq!(
            classifier.classify(&record("anything", "at all")),
            Verdict::Transient
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let classifier = FailureClassifier::new().with_permanent(MatchRule::message("Access Denied"));
        assert_eq!(
            classifier.classify(&record("auth.check", "ACCESS DENIED by origin")),
            Verdict::Permanent
        );
    }
}
