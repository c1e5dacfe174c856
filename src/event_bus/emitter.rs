use std::fmt;
use thiserror::Error;

use super::event::Event;

/// Abstract handle subsystems use to publish events without owning the bus.
///
/// Emitters are cheap to clone behind an `Arc` and must never block: the hub
/// behind them is a bounded broadcast channel that drops on lag instead of
/// applying backpressure to the job.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Emit an event in a synchronous, non-blocking manner.
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event hub closed")]
    Closed,
    #[error("event lag exceeded buffer; dropped {0} messages")]
    Lagged(usize),
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// Emitter that discards everything. Used where a subsystem is wired without
/// a bus (tests, standalone use of a single component).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: Event) -> Result<(), EmitterError> {
        Ok(())
    }
}
