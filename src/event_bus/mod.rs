//! Typed event bus connecting the core's subsystems to telemetry consumers.
//!
//! Architecture: subsystems publish through an [`EventEmitter`] into a
//! bounded broadcast [`EventHub`]; the [`EventBus`] owns the hub plus a set
//! of [`EventSink`]s, each drained by its own worker task. Slow subscribers
//! lag and lose events (counted, never blocking) rather than stalling the
//! job runner.

mod bus;
mod emitter;
mod event;
mod hub;
mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter, NullEmitter};
pub use event::{
    AbortEvent, CheckpointEvent, DiagnosticEvent, Event, ItemEvent, ItemOutcome, JobEvent,
    JobStage, ResourceEvent,
};
pub use hub::{EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
