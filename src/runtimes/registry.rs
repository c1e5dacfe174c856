use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::types::JobId;

/// Where a known job currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running { started_at: DateTime<Utc> },
    Completed { at: DateTime<Utc> },
    Aborted { at: DateTime<Utc>, reason: String },
    Cancelled { at: DateTime<Utc> },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running { .. })
    }
}

/// The process-wide mutable state: the set of known jobs and the set of
/// active monitoring sessions. Everything else in the core is either owned
/// by one task or immutable configuration.
#[derive(Debug, Default)]
pub struct Registry {
    jobs: RwLock<FxHashMap<JobId, JobStatus>>,
    monitors: RwLock<FxHashSet<Uuid>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self, job_id: &str) {
        self.jobs.write().insert(
            job_id.to_string(),
            JobStatus::Running {
                started_at: Utc::now(),
            },
        );
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        self.jobs.write().insert(job_id.to_string(), status);
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<(JobId, JobStatus)> {
        self.jobs
            .read()
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect()
    }

    pub fn monitor_started(&self, id: Uuid) {
        self.monitors.write().insert(id);
    }

    pub fn monitor_stopped(&self, id: Uuid) {
        self.monitors.write().remove(&id);
    }

    pub fn active_monitors(&self) -> usize {
        self.monitors.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_transitions_are_visible() {
        let registry = Registry::new();
        registry.job_started("job-1");
        assert!(matches!(
            registry.status("job-1"),
            Some(JobStatus::Running { .. })
        ));

        registry.set_status(
            "job-1",
            JobStatus::Aborted {
                at: Utc::now(),
                reason: "failure rate".into(),
            },
        );
        assert!(registry.status("job-1").unwrap().is_terminal());
        assert!(registry.status("unknown").is_none());
    }

    #[test]
    fn monitor_accounting() {
        let registry = Registry::new();
        let id = Uuid::new_v4();
        registry.monitor_started(id);
        assert_eq!(registry.active_monitors(), 1);
        registry.monitor_stopped(id);
        assert_eq!(registry.active_monitors(), 0);
    }
}
