use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sysinfo::{Disks, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cleanup::{BreachHandler, BreachReport, BrowserSessionRegistry, CleanupLevel};
use super::snapshot::{Metric, ResourceSnapshot, ResourceThreshold};
use crate::event_bus::{Event, EventEmitter};

/// Default sampling cadence.
pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(30);

/// Handle for one monitoring session, returned by [`ResourceMonitor::start`].
#[derive(Debug)]
pub struct MonitorHandle {
    pub id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Samples system metrics on a fixed interval and drives the cleanup ladder.
///
/// One monitor serves the whole process; each [`start`](Self::start) call
/// spawns an independent long-lived sampling task bound to one threshold and
/// one handler. Sampling never blocks the job: a sample that takes longer
/// than the interval is logged and skipped for that tick, and breach
/// handlers run on their own tasks with further breaches coalesced until
/// they return.
pub struct ResourceMonitor {
    system: Mutex<System>,
    registry: Arc<BrowserSessionRegistry>,
    interval: Duration,
    /// Mount point to measure free disk against (the checkpoint root).
    disk_path: Option<PathBuf>,
    emitter: Option<Arc<dyn EventEmitter>>,
    last: Mutex<Option<ResourceSnapshot>>,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(registry: Arc<BrowserSessionRegistry>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            registry,
            interval: DEFAULT_MONITORING_INTERVAL,
            disk_path: None,
            emitter: None,
            last: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(10));
        self
    }

    #[must_use]
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take a fresh reading of every watched metric.
    pub fn current_metrics(&self) -> ResourceSnapshot {
        let (memory_mb, memory_pct, cpu_pct) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu_usage();
            let total = system.total_memory();
            let used = system.used_memory();
            let memory_mb = used as f64 / (1024.0 * 1024.0);
            let memory_pct = if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64 * 100.0) as f32
            };
            (memory_mb, memory_pct, system.global_cpu_info().cpu_usage())
        };

        let snapshot = ResourceSnapshot {
            taken_at: Utc::now(),
            memory_mb,
            memory_pct,
            cpu_pct,
            free_disk_mb: self.free_disk_mb(),
            open_connections: self.registry.open_connections(),
            oldest_session_age_secs: self.registry.oldest_age_secs(),
        };
        *self.last.lock() = Some(snapshot.clone());
        snapshot
    }

    /// The most recent reading, falling back to a fresh sample when nothing
    /// has been taken yet. Cheap enough for per-item callers like the
    /// checkpoint draft builder.
    pub fn latest_snapshot(&self) -> ResourceSnapshot {
        if let Some(snapshot) = self.last.lock().clone() {
            return snapshot;
        }
        self.current_metrics()
    }

    /// Compare a fresh sample against a threshold.
    pub fn check_thresholds(&self, threshold: &ResourceThreshold) -> FxHashMap<Metric, bool> {
        threshold.breaches(&self.current_metrics())
    }

    /// Spawn the long-lived sampling task for one threshold + handler pair.
    pub fn start(
        self: &Arc<Self>,
        threshold: ResourceThreshold,
        handler: Arc<dyn BreachHandler>,
    ) -> MonitorHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let monitor = Arc::clone(self);
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            monitor.sample_loop(id, threshold, handler, task_cancel).await;
        });

        tracing::debug!(
            target: "crawlweave::monitor",
            session = %id,
            interval_ms = self.interval.as_millis() as u64,
            "monitoring session started"
        );
        MonitorHandle { id, cancel, join }
    }

    /// Stop a monitoring session. Cancellation takes effect after the
    /// current sample.
    pub async fn stop(handle: MonitorHandle) {
        handle.cancel.cancel();
        let _ = handle.join.await;
    }

    async fn sample_loop(
        self: Arc<Self>,
        session: Uuid,
        threshold: ResourceThreshold,
        handler: Arc<dyn BreachHandler>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so jobs get a quiet start.
        ticker.tick().await;

        let mut consecutive: FxHashMap<Metric, u32> = FxHashMap::default();
        let handler_busy = Arc::new(AtomicBool::new(false));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let snapshot = self.current_metrics();
            if started.elapsed() > self.interval {
                tracing::warn!(
                    target: "crawlweave::monitor",
                    session = %session,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "metric acquisition outlived the sampling interval; tick skipped"
                );
                continue;
            }

            let results = threshold.breaches(&snapshot);
            let mut breaching: Vec<Metric> = Vec::new();
            for (metric, breached) in &results {
                if *breached {
                    *consecutive.entry(*metric).or_insert(0) += 1;
                    breaching.push(*metric);
                } else {
                    consecutive.insert(*metric, 0);
                }
            }

            if breaching.is_empty() {
                continue;
            }
            breaching.sort_by_key(|m| m.as_str());

            let level = escalation_level(&breaching, &consecutive);
            let worst = breaching
                .iter()
                .filter_map(|m| consecutive.get(m).copied())
                .max()
                .unwrap_or(1);

            if let Some(emitter) = &self.emitter {
                for metric in &breaching {
                    let _ = emitter.emit(Event::resource(
                        metric.as_str(),
                        Some(level.as_str().to_string()),
                        format!("threshold breached ({} consecutive)", consecutive[metric]),
                    ));
                }
            }

            // Coalesce: while a handler invocation is in flight, keep
            // counting but do not pile up further invocations.
            if handler_busy.swap(true, Ordering::SeqCst) {
                tracing::debug!(
                    target: "crawlweave::monitor",
                    session = %session,
                    "breach handler still running; coalescing"
                );
                continue;
            }

            let report = BreachReport {
                level,
                metrics: breaching,
                consecutive: worst,
                snapshot,
            };
            let busy = Arc::clone(&handler_busy);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.on_breach(report).await;
                busy.store(false, Ordering::SeqCst);
            });
        }

        tracing::debug!(
            target: "crawlweave::monitor",
            session = %session,
            "monitoring session stopped"
        );
    }

    fn free_disk_mb(&self) -> u64 {
        let disks = Disks::new_with_refreshed_list();
        let chosen = match &self.disk_path {
            Some(path) => disks
                .iter()
                .filter(|d| path.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().as_os_str().len()),
            None => disks.iter().max_by_key(|d| d.available_space()),
        };
        chosen
            .map(|d| d.available_space() / (1024 * 1024))
            .unwrap_or(u64::MAX)
    }
}

/// Pick the cleanup level for the current set of breaching metrics.
///
/// Browser lifetime is a soft breach pinned to Moderate so the runner only
/// recycles sessions between items; everything else climbs the ladder with
/// its consecutive count.
fn escalation_level(breaching: &[Metric], consecutive: &FxHashMap<Metric, u32>) -> CleanupLevel {
    breaching
        .iter()
        .map(|metric| match metric {
            Metric::BrowserLifetime => CleanupLevel::Moderate,
            _ => CleanupLevel::for_consecutive(consecutive.get(metric).copied().unwrap_or(1)),
        })
        .max()
        .unwrap_or(CleanupLevel::Gentle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_lifetime_is_pinned_to_moderate() {
        let mut consecutive = FxHashMap::default();
        consecutive.insert(Metric::BrowserLifetime, 9);
        let level = escalation_level(&[Metric::BrowserLifetime], &consecutive);
        assert_eq!(level, CleanupLevel::Moderate);
    }

    #[test]
    fn worst_metric_sets_the_level() {
        let mut consecutive = FxHashMap::default();
        consecutive.insert(Metric::MemoryPct, 3);
        consecutive.insert(Metric::CpuPct, 1);
        let level = escalation_level(&[Metric::MemoryPct, Metric::CpuPct], &consecutive);
        assert_eq!(level, CleanupLevel::Aggressive);
    }
}
