use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use semver::Version;
use serde_json::Value;
use thiserror::Error;

use super::document::schema_version;

/// Errors from schema migration.
#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    /// No migration is registered for the document's major version. The
    /// store treats this as Corrupted rather than guessing at semantics.
    #[error("no migration registered from schema major {from}")]
    #[diagnostic(
        code(crawlweave::checkpoint::migration_missing),
        help("register a migration for major {from} before resuming jobs checkpointed under it")
    )]
    Missing { from: u64 },

    #[error("migration from schema major {from} failed: {message}")]
    #[diagnostic(code(crawlweave::checkpoint::migration_failed))]
    Failed { from: u64, message: String },

    #[error("migration from schema major {from} produced version {produced}, expected {expected}")]
    #[diagnostic(code(crawlweave::checkpoint::migration_wrong_target))]
    WrongTarget {
        from: u64,
        produced: String,
        expected: String,
    },
}

type MigrationFn = dyn Fn(Value) -> Result<Value, String> + Send + Sync;

/// Registry of major-version migrations.
///
/// Minor drift within the current major never reaches a migration: unknown
/// fields ride along in the document's flattened map. A differing major
/// version must have a registered function that rewrites the raw JSON into
/// the current schema (including its `version` field); the rewritten
/// document is re-parsed and used in place of the original.
#[derive(Default, Clone)]
pub struct MigrationRegistry {
    by_major: FxHashMap<u64, Arc<MigrationFn>>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut majors: Vec<&u64> = self.by_major.keys().collect();
        majors.sort();
        f.debug_struct("MigrationRegistry")
            .field("majors", &majors)
            .finish()
    }
}

impl MigrationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration from `from_major` to the current schema.
    pub fn register<F>(&mut self, from_major: u64, migrate: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.by_major.insert(from_major, Arc::new(migrate));
    }

    pub fn has(&self, from_major: u64) -> bool {
        self.by_major.contains_key(&from_major)
    }

    /// Bring a raw document to the current schema.
    ///
    /// Same-major documents pass through untouched.
    pub fn migrate_to_current(&self, value: Value, from: &Version) -> Result<Value, MigrationError> {
        let current = schema_version();
        if from.major == current.major {
            return Ok(value);
        }
        let migrate = self
            .by_major
            .get(&from.major)
            .ok_or(MigrationError::Missing { from: from.major })?;
        let migrated = migrate(value).map_err(|message| MigrationError::Failed {
            from: from.major,
            message,
        })?;

        let produced = migrated
            .get("version")
            .and_then(Value::as_str)
            .and_then(|v| Version::parse(v).ok());
        match produced {
            Some(version) if version.major == current.major => Ok(migrated),
            other => Err(MigrationError::WrongTarget {
                from: from.major,
                produced: other.map_or_else(|| "<unparseable>".to_string(), |v| v.to_string()),
                expected: current.to_string(),
            }),
        }
    }
}
