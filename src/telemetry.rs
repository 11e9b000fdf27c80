//! Tracing setup and human-readable event rendering.

use crate::events::{Event, NodeOutcome};

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta

/// Rendered output for one event, ready to hand to a plain-text sink.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    #[must_use]
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Renders an [`Event`] for a telemetry sink. Separate from [`crate::events::EventSink`]
/// so a sink can format the same stream multiple ways (plain text, JSON, ...).
pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
}

/// Terse, single-color-coded rendering: one line per event, no structure.
pub struct PlainFormatter;

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        match event {
            Event::Step(step) => EventRender {
                context: Some(format!("run:{}", step.run_id)),
                lines: vec![format!(
                    "{LINE_COLOR}step {} ran {} node(s), committed={}{RESET}\n",
                    step.step_id,
                    step.ran_nodes.len(),
                    step.committed,
                    RESET = "\x1b[0m"
                )],
            },
            Event::Node(node) => {
                let outcome = match &node.outcome {
                    NodeOutcome::Succeeded => "succeeded".to_string(),
                    NodeOutcome::SucceededWithWarning { error } => {
                        format!("succeeded (warning: {error})")
                    }
                    NodeOutcome::Retrying { error } => format!("retrying ({error})"),
                    NodeOutcome::Failed { error } => format!("failed ({error})"),
                    NodeOutcome::TimedOut => "timed out".to_string(),
                    NodeOutcome::Cancelled => "cancelled".to_string(),
                };
                EventRender {
                    context: Some(format!("{CONTEXT_COLOR}{}\x1b[0m", node.node_id)),
                    lines: vec![format!(
                        "{LINE_COLOR}{} attempt {}: {}\x1b[0m\n",
                        node.node_id, node.attempt, outcome
                    )],
                }
            }
            Event::Diagnostic(diag) => EventRender {
                context: Some(diag.scope.clone()),
                lines: vec![format!("{LINE_COLOR}[{}] {}\x1b[0m\n", diag.scope, diag.message)],
            },
        }
    }
}

/// Install a global `tracing` subscriber reading `RUST_LOG` (falling back to
/// `info`), with ANSI colors enabled. Call once at process startup; a second
/// call is a silent no-op (matches `tracing_subscriber::fmt::try_init`'s
/// own idempotence).
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init();
}
