//! Shared identifier vocabulary for the crawlweave core.
//!
//! Jobs, items, and browser sessions are all identified by opaque,
//! caller-supplied strings. The core never interprets them; it only moves
//! them between progress sets, checkpoints, and events. This module keeps
//! the aliases in one place and provides the uuid-backed generator used
//! wherever the core has to mint an identifier itself (correlation ids,
//! checkpoint ids, default job ids).

use uuid::Uuid;

/// Identifier of a job: one ordered collection of items processed under one
/// set of policies.
pub type JobId = String;

/// Identifier of a single unit of work within a job (typically a URL).
pub type ItemId = String;

/// Identifier of a live browser session driven by the caller's automation
/// layer.
pub type SessionId = String;

/// Stable identifier attached to every log line and event emitted while
/// processing a given item.
pub type CorrelationId = String;

/// Mints the identifiers the core generates on its own.
///
/// Caller-supplied ids pass through untouched; this type only covers the
/// gaps (correlation ids per item, checkpoint ids, fallback job ids).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generate a fallback job id for callers that did not supply one.
    #[must_use]
    pub fn generate_job_id(&self) -> JobId {
        format!("job-{}", Uuid::new_v4())
    }

    /// Generate a correlation id scoped to one item's processing.
    #[must_use]
    pub fn generate_correlation_id(&self) -> CorrelationId {
        Uuid::new_v4().to_string()
    }

    /// Generate a checkpoint identifier.
    #[must_use]
    pub fn generate_checkpoint_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
