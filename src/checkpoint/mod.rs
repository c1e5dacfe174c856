//! Checkpoint manager: integrity-sealed, atomically written snapshots of
//! job progress with retention and schema migration.
//!
//! On-disk layout is one directory per job under the configured root; each
//! checkpoint is a `<seq>-<uuid>.ckpt` JSON document (gzip-compressed above
//! a size threshold) whose `hash` field is SHA-256 over the canonical JSON
//! of everything else.

mod document;
mod migration;
mod store;

pub use document::{
    CheckpointDocument, CheckpointDraft, CheckpointMetadata, CheckpointPayload, CheckpointStatus,
    RECENT_ERRORS_CAP, schema_version,
};
pub use migration::{MigrationError, MigrationRegistry};
pub use store::{
    COMPRESS_THRESHOLD, CheckpointDescriptor, CheckpointError, FileCheckpointStore,
};
