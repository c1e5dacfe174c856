use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crawlweave::monitor::{
    BreachHandler, BreachReport, BrowserSessionRegistry, CleanupLevel, Metric, ResourceMonitor,
    ResourceThreshold,
};

#[derive(Default)]
struct Recorder {
    reports: Mutex<Vec<BreachReport>>,
}

#[async_trait]
impl BreachHandler for Recorder {
    async fn on_breach(&self, report: BreachReport) {
        self.reports.lock().push(report);
    }
}

#[tokio::test]
async fn current_metrics_reads_real_values() {
    let registry = Arc::new(BrowserSessionRegistry::new());
    registry.set_open_connections(7);
    registry.register("sess-1");
    let monitor = ResourceMonitor::new(Arc::clone(&registry));

    let snapshot = monitor.current_metrics();
    assert!(snapshot.memory_mb > 0.0);
    assert!(snapshot.memory_pct > 0.0 && snapshot.memory_pct <= 100.0);
    assert_eq!(snapshot.open_connections, 7);
    assert!(snapshot.oldest_session_age_secs.is_some());
}

#[tokio::test]
async fn check_thresholds_reports_per_metric_results() {
    let registry = Arc::new(BrowserSessionRegistry::new());
    registry.set_open_connections(100);
    let monitor = ResourceMonitor::new(registry);

    let threshold = ResourceThreshold {
        // Impossible to breach.
        memory_pct: Some(200.0),
        // Always breached.
        max_open_connections: Some(10),
        ..Default::default()
    };

    let results = monitor.check_thresholds(&threshold);
    assert_eq!(results.get(&Metric::MemoryPct), Some(&false));
    assert_eq!(results.get(&Metric::OpenConnections), Some(&true));
    // Unconfigured metrics are absent.
    assert!(!results.contains_key(&Metric::CpuPct));
}

#[tokio::test]
async fn persistent_breaches_escalate_through_the_ladder() {
    let registry = Arc::new(BrowserSessionRegistry::new());
    registry.set_open_connections(100);
    let monitor = Arc::new(
        ResourceMonitor::new(registry).with_interval(Duration::from_millis(20)),
    );
    let handler = Arc::new(Recorder::default());

    let threshold = ResourceThreshold {
        max_open_connections: Some(10),
        ..Default::default()
    };
    let handle = monitor.start(threshold, handler.clone());

    // Give the sampler a handful of ticks.
    tokio::time::sleep(Duration::from_millis(200)).await;
    ResourceMonitor::stop(handle).await;

    let reports = handler.reports.lock();
    assert!(
        reports.len() >= 2,
        "expected several breach reports, got {}",
        reports.len()
    );
    assert_eq!(reports[0].level, CleanupLevel::Gentle);
    assert!(reports[0].metrics.contains(&Metric::OpenConnections));
    // Later reports have climbed the ladder.
    assert!(reports.last().unwrap().level > CleanupLevel::Gentle);
    assert!(reports.last().unwrap().consecutive > reports[0].consecutive);
}

#[tokio::test]
async fn recovered_metrics_reset_their_streak() {
    let registry = Arc::new(BrowserSessionRegistry::new());
    registry.set_open_connections(100);
    let monitor = Arc::new(
        ResourceMonitor::new(Arc::clone(&registry)).with_interval(Duration::from_millis(20)),
    );
    let handler = Arc::new(Recorder::default());

    let threshold = ResourceThreshold {
        max_open_connections: Some(10),
        ..Default::default()
    };
    let handle = monitor.start(threshold, handler.clone());

    tokio::time::sleep(Duration::from_millis(90)).await;
    // Recover, then breach again: the streak starts over.
    registry.set_open_connections(0);
    tokio::time::sleep(Duration::from_millis(90)).await;
    registry.set_open_connections(100);
    tokio::time::sleep(Duration::from_millis(50)).await;
    ResourceMonitor::stop(handle).await;

    let reports = handler.reports.lock();
    assert!(!reports.is_empty());
    // After the recovery there is a fresh Gentle report.
    let recovered_restart = reports
        .windows(2)
        .any(|pair| pair[1].consecutive < pair[0].consecutive);
    assert!(
        recovered_restart,
        "expected the consecutive counter to reset after recovery"
    );
}

#[tokio::test]
async fn stale_browser_sessions_are_a_moderate_breach() {
    let registry = Arc::new(BrowserSessionRegistry::new());
    registry.register("ancient");
    let monitor = Arc::new(
        ResourceMonitor::new(Arc::clone(&registry)).with_interval(Duration::from_millis(20)),
    );
    let handler = Arc::new(Recorder::default());

    let threshold = ResourceThreshold {
        browser_lifetime_secs: Some(0),
        ..Default::default()
    };
    let handle = monitor.start(threshold, handler.clone());
    // Session ages are whole seconds; wait for the session to cross 1s so
    // the 0s limit is exceeded, then give the sampler a few more ticks.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    ResourceMonitor::stop(handle).await;

    let reports = handler.reports.lock();
    assert!(!reports.is_empty());
    for report in reports.iter() {
        assert!(report.metrics.contains(&Metric::BrowserLifetime));
        // Soft breach: pinned at Moderate no matter how long it persists.
        assert_eq!(report.level, CleanupLevel::Moderate);
    }
}
