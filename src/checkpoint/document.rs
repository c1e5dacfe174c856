use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::failure::ErrorRecord;
use crate::monitor::ResourceSnapshot;
use crate::runtimes::ProgressState;
use crate::types::{JobId, SessionId};

/// Current checkpoint schema version.
pub fn schema_version() -> Version {
    Version::new(1, 2, 0)
}

/// Bound on the error tail carried in a payload.
pub const RECENT_ERRORS_CAP: usize = 32;

/// Lifecycle of a checkpoint.
///
/// `Validating` is transient (a document whose hash has not been checked
/// yet); exactly one checkpoint per job is `Active` at a time; `Completed`
/// marks superseded or final checkpoints; `Corrupted` and `Expired` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Validating,
    Active,
    Completed,
    Corrupted,
    Expired,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointStatus::Validating => "Validating",
            CheckpointStatus::Active => "Active",
            CheckpointStatus::Completed => "Completed",
            CheckpointStatus::Corrupted => "Corrupted",
            CheckpointStatus::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// Summary counters and the resource reading taken at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub total_items: u64,
    pub completed_items: u64,
    pub failed_items: u64,
    /// Wall-clock processing time so far, seconds.
    pub processing_time: f64,
    pub browser_sessions: Vec<SessionId>,
    pub resources: ResourceSnapshot,
}

/// The resumable part of a checkpoint: progress partition, caller-defined
/// browser state, and a bounded tail of recent failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointPayload {
    pub progress: ProgressState,
    #[serde(default)]
    pub browser_state: Value,
    #[serde(default)]
    pub recent_errors: Vec<ErrorRecord>,
}

/// Everything the job runner hands the store for one snapshot.
#[derive(Debug, Clone)]
pub struct CheckpointDraft {
    pub progress: ProgressState,
    pub resources: ResourceSnapshot,
    pub browser_sessions: Vec<SessionId>,
    pub browser_state: Value,
    pub recent_errors: Vec<ErrorRecord>,
    pub processing_time_secs: f64,
}

impl CheckpointDraft {
    pub fn new(progress: ProgressState, resources: ResourceSnapshot) -> Self {
        Self {
            progress,
            resources,
            browser_sessions: Vec::new(),
            browser_state: Value::Null,
            recent_errors: Vec::new(),
            processing_time_secs: 0.0,
        }
    }

    #[must_use]
    pub fn with_browser_sessions(mut self, sessions: Vec<SessionId>) -> Self {
        self.browser_sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_browser_state(mut self, state: Value) -> Self {
        self.browser_state = state;
        self
    }

    #[must_use]
    pub fn with_recent_errors(mut self, errors: Vec<ErrorRecord>) -> Self {
        self.recent_errors = errors;
        self
    }

    #[must_use]
    pub fn with_processing_time(mut self, secs: f64) -> Self {
        self.processing_time_secs = secs;
        self
    }
}

/// The on-disk checkpoint document.
///
/// Field names are the wire format and case-sensitive. Unknown top-level
/// fields land in `unknown` and are written back out unchanged, which is
/// what keeps minor-version drift round-trippable. The hash is SHA-256 over
/// the canonical (sorted-key) JSON of every field except `hash` itself,
/// computed over the uncompressed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDocument {
    pub version: Version,
    pub id: Uuid,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    pub status: CheckpointStatus,
    pub metadata: CheckpointMetadata,
    pub payload: CheckpointPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, Value>,
}

impl CheckpointDocument {
    /// Assemble an unsealed document from a draft. Sequence numbers are the
    /// store's business; the document just records one.
    pub fn from_draft(job_id: impl Into<JobId>, sequence: u64, draft: CheckpointDraft) -> Self {
        let mut recent_errors = draft.recent_errors;
        if recent_errors.len() > RECENT_ERRORS_CAP {
            let start = recent_errors.len() - RECENT_ERRORS_CAP;
            recent_errors.drain(..start);
        }
        let progress = draft.progress;
        Self {
            version: schema_version(),
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            timestamp: Utc::now(),
            sequence,
            status: CheckpointStatus::Validating,
            metadata: CheckpointMetadata {
                total_items: progress.total() as u64,
                completed_items: progress.completed_count() as u64,
                failed_items: progress.failed_count() as u64,
                processing_time: draft.processing_time_secs,
                browser_sessions: draft.browser_sessions,
                resources: draft.resources,
            },
            payload: CheckpointPayload {
                progress,
                browser_state: draft.browser_state,
                recent_errors,
            },
            hash: None,
            unknown: serde_json::Map::new(),
        }
    }

    /// Canonical bytes for hashing: sorted-key JSON with `hash` removed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("hash");
        }
        serde_json::to_vec(&value)
    }

    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        Ok(hash_hex(&self.canonical_bytes()?))
    }

    /// Compute and attach the integrity hash.
    pub fn seal(&mut self) -> Result<(), serde_json::Error> {
        self.hash = Some(self.compute_hash()?);
        Ok(())
    }

    /// Recompute the hash and compare with the stored one. A document with
    /// no hash never verifies.
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        match &self.hash {
            Some(stored) => Ok(*stored == self.compute_hash()?),
            None => Ok(false),
        }
    }
}

pub(crate) fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Verify a parsed JSON document against its embedded hash without binding
/// to the current schema. Used on the read path before any migration runs,
/// since the hash was computed over the version that was written.
pub(crate) fn verify_value(value: &Value) -> Result<bool, serde_json::Error> {
    let Some(stored) = value.get("hash").and_then(Value::as_str) else {
        return Ok(false);
    };
    let mut canonical = value.clone();
    match canonical.as_object_mut() {
        Some(object) => {
            object.remove("hash");
        }
        None => return Ok(false),
    }
    Ok(hash_hex(&serde_json::to_vec(&canonical)?) == stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ResourceSnapshot;

    fn draft() -> CheckpointDraft {
        let mut progress = ProgressState::new(["a".to_string(), "b".to_string()]);
        progress.begin("a").unwrap();
        progress.complete_current().unwrap();
        CheckpointDraft::new(progress, ResourceSnapshot::empty())
    }

    #[test]
    fn seal_then_verify_roundtrips() {
        let mut doc = CheckpointDocument::from_draft("job-1", 1, draft());
        doc.seal().unwrap();
        assert!(doc.verify().unwrap());
    }

    #[test]
    fn any_field_change_breaks_the_hash() {
        let mut doc = CheckpointDocument::from_draft("job-1", 1, draft());
        doc.seal().unwrap();
        doc.sequence = 2;
        assert!(!doc.verify().unwrap());
    }

    #[test]
    fn unknown_fields_survive_roundtrip_and_count_toward_the_hash() {
        let mut doc = CheckpointDocument::from_draft("job-1", 3, draft());
        doc.unknown
            .insert("futureField".to_string(), serde_json::json!({"x": 1}));
        doc.seal().unwrap();

        let text = serde_json::to_string(&doc).unwrap();
        let parsed: CheckpointDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.unknown.get("futureField"), doc.unknown.get("futureField"));
        assert!(parsed.verify().unwrap());
    }

    #[test]
    fn recent_errors_are_bounded() {
        let errors = (0..100)
            .map(|i| ErrorRecord::new("network.timeout", format!("e{i}")))
            .collect();
        let doc = CheckpointDocument::from_draft("job-1", 1, draft().with_recent_errors(errors));
        assert_eq!(doc.payload.recent_errors.len(), RECENT_ERRORS_CAP);
        // The tail is kept, not the head.
        assert_eq!(doc.payload.recent_errors.last().unwrap().message, "e99");
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let mut doc = CheckpointDocument::from_draft("job-1", 1, draft());
        doc.seal().unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        for key in ["jobId", "sequence", "status", "metadata", "payload", "hash"] {
            assert!(value.get(key).is_some(), "missing wire field {key}");
        }
        assert!(value["metadata"].get("totalItems").is_some());
        assert!(value["metadata"]["resources"].get("memoryMB").is_some());
        assert!(value["payload"].get("recentErrors").is_some());
    }
}
