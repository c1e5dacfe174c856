use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The metrics the monitor watches. Each one can carry its own limit in a
/// [`ResourceThreshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MemoryPct,
    MemoryAbsolute,
    CpuPct,
    BrowserLifetime,
    FreeDisk,
    OpenConnections,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::MemoryPct => "memory_pct",
            Metric::MemoryAbsolute => "memory_mb",
            Metric::CpuPct => "cpu_pct",
            Metric::BrowserLifetime => "browser_lifetime",
            Metric::FreeDisk => "free_disk",
            Metric::OpenConnections => "open_connections",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time reading of every watched metric.
///
/// Produced by the monitor on each sampling tick and embedded into
/// checkpoint metadata at write time. Field names follow the checkpoint
/// wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub taken_at: DateTime<Utc>,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    pub memory_pct: f32,
    pub cpu_pct: f32,
    #[serde(rename = "freeDiskMB")]
    pub free_disk_mb: u64,
    pub open_connections: u32,
    /// Age of the longest-lived browser session, when any are registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_session_age_secs: Option<u64>,
}

impl ResourceSnapshot {
    /// An empty reading, used before the first sample lands.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            memory_mb: 0.0,
            memory_pct: 0.0,
            cpu_pct: 0.0,
            free_disk_mb: u64::MAX,
            open_connections: 0,
            oldest_session_age_secs: None,
        }
    }
}

/// Configurable limits. Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceThreshold {
    /// Percent of total memory in use, 0..=100.
    pub memory_pct: Option<f32>,
    /// Absolute memory in use, MB.
    pub memory_mb: Option<f64>,
    /// Percent CPU, 0..=100.
    pub cpu_pct: Option<f32>,
    /// Longest tolerated browser session lifetime, seconds. Exceeding it is
    /// a soft breach: Moderate cleanup, never a mid-item restart.
    pub browser_lifetime_secs: Option<u64>,
    /// Minimum free disk, MB.
    pub min_free_disk_mb: Option<u64>,
    pub max_open_connections: Option<u32>,
}

impl ResourceThreshold {
    /// Compare one snapshot against the configured limits.
    ///
    /// Returns an entry per configured limit, `true` when breached.
    pub fn breaches(&self, snapshot: &ResourceSnapshot) -> FxHashMap<Metric, bool> {
        let mut out = FxHashMap::default();
        if let Some(limit) = self.memory_pct {
            out.insert(Metric::MemoryPct, snapshot.memory_pct > limit);
        }
        if let Some(limit) = self.memory_mb {
            out.insert(Metric::MemoryAbsolute, snapshot.memory_mb > limit);
        }
        if let Some(limit) = self.cpu_pct {
            out.insert(Metric::CpuPct, snapshot.cpu_pct > limit);
        }
        if let Some(limit) = self.browser_lifetime_secs {
            let breached = snapshot
                .oldest_session_age_secs
                .is_some_and(|age| age > limit);
            out.insert(Metric::BrowserLifetime, breached);
        }
        if let Some(limit) = self.min_free_disk_mb {
            out.insert(Metric::FreeDisk, snapshot.free_disk_mb < limit);
        }
        if let Some(limit) = self.max_open_connections {
            out.insert(Metric::OpenConnections, snapshot.open_connections > limit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configured_limits_are_checked() {
        let threshold = ResourceThreshold {
            memory_pct: Some(80.0),
            ..Default::default()
        };
        let mut snapshot = ResourceSnapshot::empty();
        snapshot.memory_pct = 92.5;
        snapshot.cpu_pct = 100.0;

        let breaches = threshold.breaches(&snapshot);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches.get(&Metric::MemoryPct), Some(&true));
    }

    #[test]
    fn free_disk_breaches_below_the_floor() {
        let threshold = ResourceThreshold {
            min_free_disk_mb: Some(500),
            ..Default::default()
        };
        let mut snapshot = ResourceSnapshot::empty();
        snapshot.free_disk_mb = 120;
        assert_eq!(threshold.breaches(&snapshot).get(&Metric::FreeDisk), Some(&true));

        snapshot.free_disk_mb = 9000;
        assert_eq!(threshold.breaches(&snapshot).get(&Metric::FreeDisk), Some(&false));
    }

    #[test]
    fn browser_lifetime_needs_a_session() {
        let threshold = ResourceThreshold {
            browser_lifetime_secs: Some(600),
            ..Default::default()
        };
        let mut snapshot = ResourceSnapshot::empty();
        assert_eq!(
            threshold.breaches(&snapshot).get(&Metric::BrowserLifetime),
            Some(&false)
        );
        snapshot.oldest_session_age_secs = Some(900);
        assert_eq!(
            threshold.breaches(&snapshot).get(&Metric::BrowserLifetime),
            Some(&true)
        );
    }
}
