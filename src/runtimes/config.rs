use std::path::PathBuf;
use std::time::Duration;

use crate::event_bus::{EventBus, EventSink, MemorySink, StdOutSink};
use crate::monitor::DEFAULT_MONITORING_INTERVAL;

/// Immutable configuration of the resilience core.
///
/// Loaded once at startup and shared. `Default` consults the environment
/// (via `dotenvy`, so a `.env` file works) for the storage root, retention
/// count, and default policy name; everything else has code defaults that
/// callers override through the builder methods.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Root directory for per-job checkpoint directories.
    pub storage_root: PathBuf,
    /// Validated checkpoints retained per job.
    pub retention_count: usize,
    /// How long expired checkpoints linger before deletion.
    pub expiry_grace: Duration,
    /// Checkpoint after this many processed items...
    pub checkpoint_every_items: u32,
    /// ...or after this much time, whichever comes first.
    pub checkpoint_every: Duration,
    pub monitoring_interval: Duration,
    /// Name of the retry-policy preset used when a job spec does not carry
    /// its own policy.
    pub default_retry_policy: String,
    pub event_bus: EventBusConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        let storage_root = std::env::var("CRAWLWEAVE_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./checkpoints"));
        let retention_count = std::env::var("CRAWLWEAVE_RETENTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let default_retry_policy =
            std::env::var("CRAWLWEAVE_DEFAULT_POLICY").unwrap_or_else(|_| "standard".to_string());
        Self {
            storage_root,
            retention_count,
            expiry_grace: Duration::from_secs(24 * 60 * 60),
            checkpoint_every_items: 10,
            checkpoint_every: Duration::from_secs(60),
            monitoring_interval: DEFAULT_MONITORING_INTERVAL,
            default_retry_policy,
            event_bus: EventBusConfig::default(),
        }
    }
}

impl CoreConfig {
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    #[must_use]
    pub fn with_retention(mut self, count: usize) -> Self {
        self.retention_count = count;
        self
    }

    #[must_use]
    pub fn with_checkpoint_cadence(mut self, items: u32, every: Duration) -> Self {
        self.checkpoint_every_items = items.max(1);
        self.checkpoint_every = every;
        self
    }

    #[must_use]
    pub fn with_monitoring_interval(mut self, interval: Duration) -> Self {
        self.monitoring_interval = interval;
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Which sinks the runner's event bus is built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(
            Self::DEFAULT_BUFFER_CAPACITY,
            vec![SinkConfig::StdOut, SinkConfig::Memory],
        )
    }

    /// No sinks at all: events are only visible to direct subscribers.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, Vec::new())
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    pub(crate) fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|sink| match sink {
                SinkConfig::StdOut => Box::new(StdOutSink::default()) as Box<dyn EventSink>,
                SinkConfig::Memory => Box::new(MemorySink::new()) as Box<dyn EventSink>,
            })
            .collect();
        EventBus::with_capacity(sinks, self.buffer_capacity)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}
