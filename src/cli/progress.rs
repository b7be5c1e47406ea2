//! Live Attempt Streaming
//!
//! A metrics sink that prints one line per recorded attempt while a job
//! runs. Events from concurrent units interleave; every line names its unit.

use std::sync::atomic::{AtomicUsize, Ordering};

use console::style;

use crate::ai::metrics::{MetricsEvent, MetricsSink};

/// Console renderer for attempt events
pub struct ConsoleRenderer {
    /// Suppress everything but failed attempts
    quiet: bool,
    printed: AtomicUsize,
}

impl ConsoleRenderer {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            printed: AtomicUsize::new(0),
        }
    }

    /// Lines written so far
    pub fn printed(&self) -> usize {
        self.printed.load(Ordering::Relaxed)
    }

    /// Render one event as a single console line
    pub fn format_event(event: &MetricsEvent) -> String {
        let marker = if event.outcome.is_success() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        let tier = event
            .tier
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let score = event
            .semantic_score
            .map(|s| format!(" score={:.2}", s))
            .unwrap_or_default();

        format!(
            "{} {} #{} {} [{}] {}{} {}",
            marker,
            style(&event.unit_id).cyan(),
            event.attempt_index,
            event.strategy,
            tier,
            event.outcome,
            score,
            style(format!("{} tok, {}ms", event.tokens, event.latency_ms)).dim(),
        )
    }
}

impl MetricsSink for ConsoleRenderer {
    fn emit(&self, event: &MetricsEvent) {
        if self.quiet && event.outcome.is_success() {
            return;
        }
        eprintln!("{}", Self::format_event(event));
        self.printed.fetch_add(1, Ordering::Relaxed);
    }
}
