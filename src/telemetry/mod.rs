//! Rendering and tracing bootstrap.
//!
//! Sinks hand events to a [`TelemetryFormatter`] to turn them into text;
//! [`init_tracing`] installs the process-wide `tracing` subscriber used by
//! every subsystem's structured logs.

use tracing_subscriber::EnvFilter;

use crate::event_bus::Event;
use crate::failure::FailureEvent;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_failures(&self, failures: &[FailureEvent]) -> Vec<EventRender>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFormatter;

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn format_cause_chain(record: &crate::failure::ErrorRecord, indent: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &record.cause {
        let indent_str = "  ".repeat(indent);
        lines.push(format!(
            "{LINE_COLOR}{}cause: {}{RESET_COLOR}\n",
            indent_str, cause.message
        ));
        lines.extend(format_cause_chain(cause, indent + 1));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{LINE_COLOR}{}{RESET_COLOR}\n", event);
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }

    fn render_failures(&self, failures: &[FailureEvent]) -> Vec<EventRender> {
        failures
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let mut lines = Vec::new();
                let head = format!(
                    "{CONTEXT_COLOR}{:?}/{:?} via {}{RESET_COLOR}",
                    f.category, f.severity, f.source
                );
                lines.push(format!("[{}] {} | {} | {}\n", i, f.at, f.correlation_id, head));
                lines.push(format!(
                    "{LINE_COLOR}  error[{}]: {}{RESET_COLOR}\n",
                    f.record.kind, f.record.message
                ));
                lines.extend(format_cause_chain(&f.record, 1));
                if let Some(action) = &f.action {
                    lines.push(format!("{LINE_COLOR}  action: {:?}{RESET_COLOR}\n", action));
                }
                if !f.context.is_empty() {
                    lines.push(format!(
                        "{LINE_COLOR}  context: {}{RESET_COLOR}\n",
                        serde_json::to_string(&f.context).unwrap_or_default()
                    ));
                }
                EventRender {
                    context: Some(format!("{:?}", f.category)),
                    lines,
                }
            })
            .collect()
    }
}

/// Install the process-wide tracing subscriber.
///
/// Filter comes from `RUST_LOG` (falling back to `info`); output is the fmt
/// layer with ANSI colors when stderr is a terminal. Calling this twice is
/// harmless: the second call loses the race and is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
