//! Execution runtime: configuration, progress bookkeeping, the job runner,
//! and the process-wide registry of jobs and monitoring sessions.

mod config;
mod job;
mod progress;
mod registry;

pub use config::{CoreConfig, EventBusConfig, SinkConfig};
pub use job::{
    ItemOperation, JobError, JobOutcome, JobReport, JobRunner, JobSpec, OperationContext,
};
pub use progress::{ProgressError, ProgressState};
pub use registry::{JobStatus, Registry};
