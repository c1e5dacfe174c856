//! Resource monitor: background sampling of memory, CPU, disk, connection,
//! and browser-lifetime metrics, with edge-triggered breach callbacks and
//! the Gentle → Moderate → Aggressive → Force cleanup ladder.

mod cleanup;
mod sampler;
mod snapshot;

pub use cleanup::{BreachHandler, BreachReport, BrowserSessionRegistry, CleanupLevel};
pub use sampler::{DEFAULT_MONITORING_INTERVAL, MonitorHandle, ResourceMonitor};
pub use snapshot::{Metric, ResourceSnapshot, ResourceThreshold};
