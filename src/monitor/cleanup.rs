use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::snapshot::{Metric, ResourceSnapshot};
use crate::types::SessionId;

/// The cleanup ladder. Breach handlers escalate through these levels as
/// breaches persist across consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CleanupLevel {
    /// Close idle tabs, drop caches.
    Gentle,
    /// Terminate the oldest browser session; job state untouched.
    Moderate,
    /// Terminate all browser sessions, force GC.
    Aggressive,
    /// Refuse new work; request abort.
    Force,
}

impl CleanupLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupLevel::Gentle => "gentle",
            CleanupLevel::Moderate => "moderate",
            CleanupLevel::Aggressive => "aggressive",
            CleanupLevel::Force => "force",
        }
    }

    /// Level for the n-th consecutive breach of a metric (1-indexed).
    #[must_use]
    pub fn for_consecutive(count: u32) -> Self {
        match count {
            0 | 1 => CleanupLevel::Gentle,
            2 => CleanupLevel::Moderate,
            3 => CleanupLevel::Aggressive,
            _ => CleanupLevel::Force,
        }
    }
}

/// What the monitor hands to a breach handler: the requested cleanup level,
/// which metrics are breaching, the worst consecutive-breach streak, and the
/// snapshot that tripped it.
#[derive(Debug, Clone)]
pub struct BreachReport {
    pub level: CleanupLevel,
    pub metrics: Vec<Metric>,
    pub consecutive: u32,
    pub snapshot: ResourceSnapshot,
}

/// Receiver of breach notifications.
///
/// Invoked asynchronously on its own task; the sampler keeps ticking and
/// coalesces further breaches until the handler returns.
#[async_trait]
pub trait BreachHandler: Send + Sync {
    async fn on_breach(&self, report: BreachReport);
}

/// Shared ledger of live browser sessions.
///
/// The job runner registers sessions as the automation layer opens them and
/// retires them on close; the monitor reads ages from here so browser
/// lifetime is sampled like any other metric. Also carries the
/// open-connections gauge, which only the caller's layer can know.
#[derive(Debug, Default)]
pub struct BrowserSessionRegistry {
    sessions: RwLock<FxHashMap<SessionId, DateTime<Utc>>>,
    connections: AtomicU32,
}

impl BrowserSessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<SessionId>) {
        self.sessions.write().insert(id.into(), Utc::now());
    }

    /// Retire a session by id. Returns whether it was known.
    pub fn retire(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Retire the longest-lived session, returning its id.
    pub fn retire_oldest(&self) -> Option<SessionId> {
        let mut sessions = self.sessions.write();
        let oldest = sessions
            .iter()
            .min_by_key(|(_, opened)| **opened)
            .map(|(id, _)| id.clone())?;
        sessions.remove(&oldest);
        Some(oldest)
    }

    /// Retire every session, returning the ids.
    pub fn retire_all(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write();
        let ids: Vec<SessionId> = sessions.keys().cloned().collect();
        sessions.clear();
        ids
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Age in seconds of the longest-lived session.
    pub fn oldest_age_secs(&self) -> Option<u64> {
        let sessions = self.sessions.read();
        let oldest = sessions.values().min()?;
        let age = Utc::now().signed_duration_since(*oldest);
        Some(age.num_seconds().max(0) as u64)
    }

    pub fn set_open_connections(&self, count: u32) {
        self.connections.store(count, Ordering::Relaxed);
    }

    pub fn open_connections(&self) -> u32 {
        self.connections.load(Ordering::Relaxed)
    }
}
