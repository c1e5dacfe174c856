//! # Crawlweave: Resilience Core for Long-Running Scraping Jobs
//!
//! Crawlweave is the resilience and session-orchestration core of a
//! browser-driven scraping framework. It drives multi-hour jobs over
//! thousands of items to completion (or an orderly abort) without losing
//! progress, leaking browser sessions, or letting transient failures
//! snowball into outages.
//!
//! It deliberately does **not** scrape anything: page fetching, DOM work,
//! and selector resolution live in caller-supplied operations. The core
//! wraps those operations in five cooperating subsystems:
//!
//! - [`retry`] — classifies failures and schedules jittered exponential
//!   backoff under a per-policy attempt cap
//! - [`checkpoint`] — integrity-sealed, atomically written snapshots of job
//!   progress, with retention and schema migration
//! - [`monitor`] — background sampling of memory/CPU/disk/browser-lifetime
//!   metrics driving the Gentle → Moderate → Aggressive → Force cleanup
//!   ladder
//! - [`abort`] — sliding-window failure analysis and the ordered abort
//!   sequence
//! - [`failure`] — routes every error through the above into a single
//!   recovery decision
//!
//! The [`runtimes`] module ties them together: [`runtimes::JobRunner`]
//! sequences items, owns progress state, and acts only on recovery
//! decisions, never on raw errors.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawlweave::failure::ErrorRecord;
//! use crawlweave::runtimes::{CoreConfig, JobRunner, JobSpec, OperationContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = JobRunner::new(CoreConfig::default());
//!
//! let items: Vec<String> = (0..100)
//!     .map(|i| format!("https://example.com/page/{i}"))
//!     .collect();
//! let spec = JobSpec::new("catalog-crawl", items);
//!
//! let report = runner
//!     .run_job(
//!         spec,
//!         Arc::new(|item: String, _ctx: OperationContext| async move {
//!             // Drive the browser here; return a value or a structured error.
//!             if item.ends_with("/13") {
//!                 Err(ErrorRecord::new("network.timeout", "page load timed out"))
//!             } else {
//!                 Ok(serde_json::json!({"scraped": item}))
//!             }
//!         }),
//!     )
//!     .await?;
//!
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! Kill the process mid-run and submit the same job id again: the runner
//! resumes from the newest checkpoint whose hash validates, re-processing
//! only the item that was in flight.
//!
//! ## Observability
//!
//! Every subsystem publishes typed events on the [`event_bus`]; sinks fan
//! them out to stdout, channels, JSON-lines files, or memory. Structured
//! logs go through `tracing` (see [`telemetry::init_tracing`]) and always
//! carry the item's correlation id.
//!
//! ## Module guide
//!
//! - [`types`] — identifier vocabulary and id generation
//! - [`event_bus`] — typed events, bounded hub, pluggable sinks
//! - [`telemetry`] — formatters and the tracing bootstrap
//! - [`retry`] — policies, classifier, engine
//! - [`failure`] — error records, failure events, the failure handler
//! - [`checkpoint`] — document model, file store, migrations
//! - [`monitor`] — thresholds, sampler, cleanup ladder, session registry
//! - [`abort`] — outcome window, abort policy, controller
//! - [`runtimes`] — configuration, progress state, job runner, registry

pub mod abort;
pub mod checkpoint;
pub mod event_bus;
pub mod failure;
pub mod monitor;
pub mod retry;
pub mod runtimes;
pub mod telemetry;
pub mod types;
