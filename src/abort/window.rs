use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::failure::{FailureCategory, Severity};

/// One item-level outcome as seen by the abort controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub category: Option<FailureCategory>,
    pub severity: Option<Severity>,
}

impl OperationOutcome {
    pub fn success() -> Self {
        Self {
            at: Utc::now(),
            success: true,
            category: None,
            severity: None,
        }
    }

    pub fn failure(category: FailureCategory, severity: Severity) -> Self {
        Self {
            at: Utc::now(),
            success: false,
            category: Some(category),
            severity: Some(severity),
        }
    }

    fn is_crash(&self) -> bool {
        !self.success && self.category.is_some_and(|c| c.is_crash())
    }
}

/// Ring of the most recent operation outcomes for one job.
///
/// Holds at most `capacity` entries; older outcomes fall off the back. A
/// recorded Critical failure is sticky — it stays tripped even after the
/// triggering entry leaves the ring, because a Critical failure is a
/// terminal signal, not a rate.
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    capacity: usize,
    ring: VecDeque<OperationOutcome>,
    critical_seen: bool,
}

impl OutcomeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: VecDeque::with_capacity(capacity.max(1)),
            critical_seen: false,
        }
    }

    pub fn push(&mut self, outcome: OperationOutcome) {
        if !outcome.success && outcome.severity == Some(Severity::Critical) {
            self.critical_seen = true;
        }
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Share of failures among recorded outcomes.
    pub fn failure_rate(&self) -> f64 {
        if self.ring.is_empty() {
            return 0.0;
        }
        let failures = self.ring.iter().filter(|o| !o.success).count();
        failures as f64 / self.ring.len() as f64
    }

    /// Time spanned by the ring, oldest to newest entry.
    pub fn span(&self) -> ChronoDuration {
        match (self.ring.front(), self.ring.back()) {
            (Some(first), Some(last)) => last.at.signed_duration_since(first.at),
            _ => ChronoDuration::zero(),
        }
    }

    /// Length of the trailing run of crash-category failures.
    pub fn consecutive_crashes(&self) -> u32 {
        self.ring
            .iter()
            .rev()
            .take_while(|o| o.is_crash())
            .count() as u32
    }

    pub fn critical_seen(&self) -> bool {
        self.critical_seen
    }
}
