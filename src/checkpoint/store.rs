use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use miette::Diagnostic;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use semver::Version;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::document::{
    CheckpointDocument, CheckpointDraft, CheckpointStatus, schema_version, verify_value,
};
use super::migration::{MigrationError, MigrationRegistry};
use crate::event_bus::{Event, EventEmitter};
use crate::types::JobId;

/// Compress documents larger than this once serialized.
pub const COMPRESS_THRESHOLD: usize = 64 * 1024;

/// Design targets from the checkpoint contract; exceeding them is reported
/// via tracing, never failed.
const WRITE_TARGET: Duration = Duration::from_millis(100);
const READ_TARGET: Duration = Duration::from_millis(50);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors from checkpoint storage.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint not found: {what}")]
    #[diagnostic(code(crawlweave::checkpoint::not_found))]
    NotFound { what: String },

    #[error("checkpoint corrupted at {path}: {reason}")]
    #[diagnostic(
        code(crawlweave::checkpoint::corrupted),
        help("the file is retained for inspection; resume falls back to the previous validated checkpoint")
    )]
    Corrupted { path: PathBuf, reason: String },

    #[error("checkpoint write failed for job {job_id}: {source}")]
    #[diagnostic(
        code(crawlweave::checkpoint::write_failed),
        help("prior checkpoints are unaffected; check free space and permissions under the storage root")
    )]
    WriteFailed {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint io: {0}")]
    #[diagnostic(code(crawlweave::checkpoint::io))]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization: {0}")]
    #[diagnostic(code(crawlweave::checkpoint::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Migration(#[from] MigrationError),
}

/// Cheap listing entry: enough to choose a checkpoint without deserializing
/// its payload sets into progress state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointDescriptor {
    pub id: Uuid,
    pub job_id: JobId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub status: CheckpointStatus,
    pub path: PathBuf,
}

/// File-backed checkpoint manager.
///
/// Layout: one directory per job under the configured root, one
/// `<seq>-<uuid>.ckpt` file per checkpoint. Writes follow the atomic
/// protocol (tmp file, fsync, rename, directory fsync) and are serialized
/// per job by an internal async mutex; reads verify the integrity hash and
/// walk backward past corrupted files. Corrupted and expired files are
/// marked with sidecars (`.corrupt`, `.expired`) instead of being rewritten,
/// so the original bytes stay available for inspection.
pub struct FileCheckpointStore {
    root: PathBuf,
    retention_count: usize,
    expiry_grace: Duration,
    compress_threshold: usize,
    migrations: MigrationRegistry,
    emitter: Option<Arc<dyn EventEmitter>>,
    write_locks: ParkingMutex<FxHashMap<JobId, Arc<AsyncMutex<()>>>>,
    next_sequence: ParkingMutex<FxHashMap<JobId, u64>>,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>, retention_count: usize) -> Self {
        Self {
            root: root.into(),
            retention_count: retention_count.max(1),
            expiry_grace: Duration::from_secs(24 * 60 * 60),
            compress_threshold: COMPRESS_THRESHOLD,
            migrations: MigrationRegistry::new(),
            emitter: None,
            write_locks: ParkingMutex::new(FxHashMap::default()),
            next_sequence: ParkingMutex::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn with_expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    #[must_use]
    pub fn with_compress_threshold(mut self, threshold: usize) -> Self {
        self.compress_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a new checkpoint for a job and return its descriptor.
    ///
    /// The document is sealed (status Active, hash attached) and verified in
    /// memory before any byte reaches disk; the previous Active checkpoint
    /// is demoted to Completed, and retention runs afterwards.
    pub async fn create(
        &self,
        job_id: &str,
        draft: CheckpointDraft,
    ) -> Result<CheckpointDescriptor, CheckpointError> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::WriteFailed {
            job_id: job_id.to_string(),
            source,
        })?;

        let sequence = self.allocate_sequence(job_id, &dir)?;
        let mut doc = CheckpointDocument::from_draft(job_id, sequence, draft);
        doc.status = CheckpointStatus::Active;
        doc.seal()?;
        if !doc.verify()? {
            // Canonicalization is deterministic, so this only trips on a bug.
            return Err(CheckpointError::Corrupted {
                path: dir.clone(),
                reason: "freshly sealed document failed verification".to_string(),
            });
        }

        let name = file_name(sequence, doc.id);
        let final_path = dir.join(&name);
        let mut bytes = serde_json::to_vec(&doc)?;
        if bytes.len() > self.compress_threshold {
            bytes = gzip(&bytes).map_err(|source| CheckpointError::WriteFailed {
                job_id: job_id.to_string(),
                source,
            })?;
        }

        self.write_atomic(job_id, &dir, &final_path, &bytes)?;
        self.demote_previous_active(job_id, &dir, sequence);
        self.apply_retention(job_id, &dir)?;

        let elapsed = started.elapsed();
        if elapsed > WRITE_TARGET {
            tracing::warn!(
                target: "crawlweave::checkpoint",
                job_id,
                sequence,
                elapsed_ms = elapsed.as_millis() as u64,
                "checkpoint write exceeded its design target"
            );
        }
        tracing::debug!(
            target: "crawlweave::checkpoint",
            job_id,
            sequence,
            path = %final_path.display(),
            compressed = bytes.starts_with(&GZIP_MAGIC),
            "checkpoint written"
        );
        if let Some(emitter) = &self.emitter {
            let _ = emitter.emit(Event::checkpoint(
                job_id,
                sequence,
                CheckpointStatus::Active.to_string(),
                "checkpoint written",
            ));
        }

        Ok(CheckpointDescriptor {
            id: doc.id,
            job_id: job_id.to_string(),
            sequence,
            timestamp: doc.timestamp,
            status: CheckpointStatus::Active,
            path: final_path,
        })
    }

    /// Load one checkpoint by id, verifying its integrity hash.
    pub async fn load(
        &self,
        job_id: &str,
        checkpoint_id: Uuid,
    ) -> Result<CheckpointDocument, CheckpointError> {
        let dir = self.job_dir(job_id);
        let entry = self
            .scan(&dir, job_id)?
            .into_iter()
            .find(|e| e.id == checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound {
                what: format!("{job_id}/{checkpoint_id}"),
            })?;
        self.read_document(&entry.path)
    }

    /// Load the newest checkpoint whose hash validates, walking backward
    /// past corrupted files (each gets a `.corrupt` sidecar and an event).
    pub async fn load_latest(
        &self,
        job_id: &str,
    ) -> Result<Option<CheckpointDocument>, CheckpointError> {
        let dir = self.job_dir(job_id);
        if !dir.is_dir() {
            return Ok(None);
        }
        for entry in self.scan(&dir, job_id)? {
            if sidecar(&entry.path, "corrupt").exists() {
                continue;
            }
            match self.read_document(&entry.path) {
                Ok(doc) => return Ok(Some(doc)),
                Err(CheckpointError::Corrupted { path, reason }) => {
                    self.mark_corrupted(job_id, entry.sequence, &path, &reason);
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    /// Newest-first descriptors for a job.
    pub async fn list(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<CheckpointDescriptor>, CheckpointError> {
        let dir = self.job_dir(job_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for mut entry in self.scan(&dir, job_id)? {
            if out.len() == limit {
                break;
            }
            if sidecar(&entry.path, "corrupt").exists() {
                entry.status = CheckpointStatus::Corrupted;
            } else if sidecar(&entry.path, "expired").exists() {
                entry.status = CheckpointStatus::Expired;
            } else if let Ok(doc) = self.parse_unverified(&entry.path) {
                entry.status = doc.status;
                entry.timestamp = doc.timestamp;
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Id of the newest validated checkpoint, if any.
    pub async fn latest(&self, job_id: &str) -> Result<Option<Uuid>, CheckpointError> {
        Ok(self.load_latest(job_id).await?.map(|doc| doc.id))
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    fn job_lock(&self, job_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock();
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Sequence numbers are dense and strictly increasing per job: seeded
    /// from the highest on-disk sequence, then cached.
    fn allocate_sequence(&self, job_id: &str, dir: &Path) -> Result<u64, CheckpointError> {
        let mut sequences = self.next_sequence.lock();
        let next = match sequences.get(job_id) {
            Some(next) => *next,
            None => {
                let max = self
                    .scan(dir, job_id)?
                    .first()
                    .map(|entry| entry.sequence)
                    .unwrap_or(0);
                max + 1
            }
        };
        sequences.insert(job_id.to_string(), next + 1);
        Ok(next)
    }

    /// Newest-first raw directory entries (no sidecar interpretation).
    fn scan(&self, dir: &Path, job_id: &str) -> Result<Vec<CheckpointDescriptor>, CheckpointError> {
        let mut entries = Vec::new();
        if !dir.is_dir() {
            return Ok(entries);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((sequence, id)) = parse_file_name(name) else {
                continue;
            };
            entries.push(CheckpointDescriptor {
                id,
                job_id: job_id.to_string(),
                sequence,
                timestamp: file_mtime(&path),
                status: CheckpointStatus::Validating,
                path,
            });
        }
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(entries)
    }

    fn write_atomic(
        &self,
        job_id: &str,
        dir: &Path,
        final_path: &Path,
        bytes: &[u8],
    ) -> Result<(), CheckpointError> {
        let tmp_path = final_path.with_extension("ckpt.tmp");
        let result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, final_path)?;
            // Make the rename itself durable.
            File::open(dir)?.sync_all()?;
            Ok(())
        })();
        if let Err(source) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(CheckpointError::WriteFailed {
                job_id: job_id.to_string(),
                source,
            });
        }
        Ok(())
    }

    /// Rewrite the previous Active checkpoint as Completed so only one
    /// Active checkpoint exists per job. Best effort: a failure here leaves
    /// an extra Active file behind, which resume handles by taking the
    /// newest, so it is logged rather than failed.
    fn demote_previous_active(&self, job_id: &str, dir: &Path, new_sequence: u64) {
        let Ok(entries) = self.scan(dir, job_id) else {
            return;
        };
        for entry in entries {
            if entry.sequence >= new_sequence || sidecar(&entry.path, "corrupt").exists() {
                continue;
            }
            let Ok(mut doc) = self.parse_unverified(&entry.path) else {
                continue;
            };
            if doc.status != CheckpointStatus::Active {
                break;
            }
            doc.status = CheckpointStatus::Completed;
            let demoted = doc
                .seal()
                .map_err(CheckpointError::from)
                .and_then(|()| serde_json::to_vec(&doc).map_err(CheckpointError::from))
                .and_then(|mut bytes| {
                    if bytes.len() > self.compress_threshold {
                        bytes = gzip(&bytes).map_err(|source| CheckpointError::WriteFailed {
                            job_id: job_id.to_string(),
                            source,
                        })?;
                    }
                    self.write_atomic(job_id, dir, &entry.path, &bytes)
                });
            if let Err(err) = demoted {
                tracing::warn!(
                    target: "crawlweave::checkpoint",
                    job_id,
                    sequence = entry.sequence,
                    %err,
                    "failed to demote previous active checkpoint"
                );
            }
            break;
        }
    }

    /// Keep the newest `retention_count` validated checkpoints (the Active
    /// one is always among them). Surplus files get an `.expired` sidecar
    /// stamped with the transition time and are deleted once the grace
    /// interval has elapsed. Corrupted files are never touched.
    fn apply_retention(&self, job_id: &str, dir: &Path) -> Result<(), CheckpointError> {
        let entries = self.scan(dir, job_id)?;
        let mut kept = 0usize;
        for entry in entries {
            if sidecar(&entry.path, "corrupt").exists() {
                continue;
            }
            let expired_marker = sidecar(&entry.path, "expired");
            if !expired_marker.exists() {
                if kept < self.retention_count {
                    kept += 1;
                    continue;
                }
                // Transition to Expired.
                fs::write(&expired_marker, Utc::now().to_rfc3339())?;
                tracing::debug!(
                    target: "crawlweave::checkpoint",
                    job_id,
                    sequence = entry.sequence,
                    "checkpoint expired"
                );
                continue;
            }
            let expired_at = fs::read_to_string(&expired_marker)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| file_mtime(&expired_marker));
            let age = Utc::now().signed_duration_since(expired_at);
            if age.to_std().unwrap_or_default() >= self.expiry_grace {
                fs::remove_file(&entry.path)?;
                fs::remove_file(&expired_marker)?;
                tracing::debug!(
                    target: "crawlweave::checkpoint",
                    job_id,
                    sequence = entry.sequence,
                    "expired checkpoint removed after grace interval"
                );
            }
        }
        Ok(())
    }

    fn mark_corrupted(&self, job_id: &str, sequence: u64, path: &Path, reason: &str) {
        let marker = sidecar(path, "corrupt");
        if let Err(err) = fs::write(&marker, reason) {
            tracing::warn!(
                target: "crawlweave::checkpoint",
                job_id,
                path = %path.display(),
                %err,
                "failed to write corruption marker"
            );
        }
        tracing::error!(
            target: "crawlweave::checkpoint",
            job_id,
            sequence,
            path = %path.display(),
            reason,
            "corrupted checkpoint detected; falling back to an older one"
        );
        if let Some(emitter) = &self.emitter {
            let _ = emitter.emit(Event::checkpoint(
                job_id,
                sequence,
                CheckpointStatus::Corrupted.to_string(),
                format!("corrupted checkpoint: {reason}"),
            ));
        }
    }

    /// Read, hash-verify, and (if needed) migrate one checkpoint file.
    fn read_document(&self, path: &Path) -> Result<CheckpointDocument, CheckpointError> {
        let started = Instant::now();
        let raw = fs::read(path)?;
        let bytes = if raw.starts_with(&GZIP_MAGIC) {
            gunzip(&raw).map_err(|err| CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("gzip payload unreadable: {err}"),
            })?
        } else {
            raw
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("invalid JSON: {err}"),
            })?;

        // The hash was computed over the schema version that was written, so
        // verification happens before any migration rewrites the document.
        if !verify_value(&value)? {
            return Err(CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: "integrity hash mismatch".to_string(),
            });
        }

        let version = value
            .get("version")
            .and_then(Value::as_str)
            .and_then(|v| Version::parse(v).ok())
            .ok_or_else(|| CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: "missing or unparseable schema version".to_string(),
            })?;

        let value = if version.major == schema_version().major {
            value
        } else {
            self.migrations
                .migrate_to_current(value, &version)
                .map_err(|err| match err {
                    // No migration path means the document cannot be trusted
                    // under current semantics.
                    MigrationError::Missing { .. } => CheckpointError::Corrupted {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    },
                    other => CheckpointError::Migration(other),
                })?
        };

        let doc: CheckpointDocument =
            serde_json::from_value(value).map_err(|err| CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("schema mismatch: {err}"),
            })?;

        let elapsed = started.elapsed();
        if elapsed > READ_TARGET {
            tracing::warn!(
                target: "crawlweave::checkpoint",
                path = %path.display(),
                elapsed_ms = elapsed.as_millis() as u64,
                "checkpoint read exceeded its design target"
            );
        }
        Ok(doc)
    }

    /// Parse without hash verification, for listings and demotion.
    fn parse_unverified(&self, path: &Path) -> Result<CheckpointDocument, CheckpointError> {
        let raw = fs::read(path)?;
        let bytes = if raw.starts_with(&GZIP_MAGIC) {
            gunzip(&raw)?
        } else {
            raw
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn file_name(sequence: u64, id: Uuid) -> String {
    format!("{sequence:08}-{id}.ckpt")
}

fn parse_file_name(name: &str) -> Option<(u64, Uuid)> {
    let stem = name.strip_suffix(".ckpt")?;
    let (seq, id) = stem.split_once('-')?;
    Some((seq.parse().ok()?, Uuid::parse_str(id).ok()?))
}

fn sidecar(path: &Path, kind: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(kind);
    path.with_file_name(name)
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
