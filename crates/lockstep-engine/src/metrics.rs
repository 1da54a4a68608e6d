//! Activation metrics.
//!
//! The registry keeps one sample per finished activation behind a plain
//! mutex; recording happens once per activation, so contention is not a
//! concern. Reports render in three shapes for logs, terminals, and
//! machine consumers.

use std::sync::Mutex;
use std::time::Duration;

use jiff::Timestamp;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use uuid::Uuid;

const TRACING_TARGET: &str = "lockstep_engine::metrics";

/// How an activation ended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr, IntoStaticStr, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The activation completed and produced a result.
    Succeeded,
    /// The terminal operation (or an operation, when none is flagged) failed.
    Failed,
    /// The activation exceeded its deadline.
    TimedOut,
    /// The activation was cancelled from outside.
    Cancelled,
}

/// One finished activation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationSample {
    /// The activation id.
    pub activation_id: Uuid,
    /// When the activation started.
    pub started: Timestamp,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// How it ended.
    pub outcome: OutcomeKind,
    /// Operations the activation ran.
    pub ops_executed: usize,
    /// Operations that ended in failure.
    pub ops_failed: usize,
    /// Effects delivered to the sink.
    pub effects_released: usize,
}

/// Output shape for [`MetricsRegistry::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ReportFormat {
    /// One summary line plus one line per activation.
    #[default]
    Plain,
    /// Fixed-width columns with a header row.
    Table,
    /// A JSON array of samples.
    Json,
}

/// Registry of finished-activation samples.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    samples: Mutex<Vec<ActivationSample>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished activation.
    pub fn record(&self, sample: ActivationSample) {
        tracing::debug!(
            target: TRACING_TARGET,
            activation = %sample.activation_id,
            outcome = %sample.outcome,
            duration_ms = sample.duration_ms,
            effects = sample.effects_released,
            "activation recorded"
        );
        self.samples
            .lock()
            .expect("metrics lock poisoned")
            .push(sample);
    }

    /// Returns a copy of every sample, in recording order.
    pub fn snapshot(&self) -> Vec<ActivationSample> {
        self.samples
            .lock()
            .expect("metrics lock poisoned")
            .clone()
    }

    /// Renders every sample in the requested format.
    pub fn render(&self, format: ReportFormat) -> String {
        let samples = self.snapshot();
        match format {
            ReportFormat::Plain => render_plain(&samples),
            ReportFormat::Table => render_table(&samples),
            ReportFormat::Json => {
                serde_json::to_string_pretty(&samples).unwrap_or_else(|_| "[]".to_owned())
            }
        }
    }
}

fn summarize(samples: &[ActivationSample]) -> (usize, usize, Duration) {
    let succeeded = samples
        .iter()
        .filter(|s| s.outcome == OutcomeKind::Succeeded)
        .count();
    let total_ms: u64 = samples.iter().map(|s| s.duration_ms).sum();
    let average = if samples.is_empty() {
        Duration::ZERO
    } else {
        Duration::from_millis(total_ms / samples.len() as u64)
    };
    (samples.len(), succeeded, average)
}

fn render_plain(samples: &[ActivationSample]) -> String {
    let (total, succeeded, average) = summarize(samples);
    let mut out = format!(
        "activations: {total} ({succeeded} succeeded), average duration: {}ms\n",
        average.as_millis()
    );
    for sample in samples {
        out.push_str(&format!(
            "{} {} in {}ms, {} ops ({} failed), {} effects\n",
            sample.activation_id,
            sample.outcome,
            sample.duration_ms,
            sample.ops_executed,
            sample.ops_failed,
            sample.effects_released
        ));
    }
    out
}

fn render_table(samples: &[ActivationSample]) -> String {
    let mut out = format!(
        "{:<36} {:>10} {:>12} {:>5} {:>7} {:>8}\n",
        "activation", "outcome", "duration_ms", "ops", "failed", "effects"
    );
    for sample in samples {
        out.push_str(&format!(
            "{:<36} {:>10} {:>12} {:>5} {:>7} {:>8}\n",
            sample.activation_id,
            sample.outcome.as_ref(),
            sample.duration_ms,
            sample.ops_executed,
            sample.ops_failed,
            sample.effects_released
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(outcome: OutcomeKind, duration_ms: u64) -> ActivationSample {
        ActivationSample {
            activation_id: Uuid::now_v7(),
            started: Timestamp::now(),
            duration_ms,
            outcome,
            ops_executed: 4,
            ops_failed: usize::from(outcome == OutcomeKind::Failed),
            effects_released: 3,
        }
    }

    #[test]
    fn test_snapshot_preserves_recording_order() {
        let registry = MetricsRegistry::new();
        registry.record(sample(OutcomeKind::Succeeded, 10));
        registry.record(sample(OutcomeKind::Failed, 30));

        let samples = registry.snapshot();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].outcome, OutcomeKind::Succeeded);
        assert_eq!(samples[1].outcome, OutcomeKind::Failed);
    }

    #[test]
    fn test_plain_report_summarizes() {
        let registry = MetricsRegistry::new();
        registry.record(sample(OutcomeKind::Succeeded, 10));
        registry.record(sample(OutcomeKind::TimedOut, 30));

        let report = registry.render(ReportFormat::Plain);
        assert!(report.starts_with("activations: 2 (1 succeeded), average duration: 20ms"));
        assert!(report.contains("timed_out"));
    }

    #[test]
    fn test_table_report_has_header_and_rows() {
        let registry = MetricsRegistry::new();
        registry.record(sample(OutcomeKind::Succeeded, 5));

        let report = registry.render(ReportFormat::Table);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("duration_ms"));
        assert!(lines[1].contains("succeeded"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let registry = MetricsRegistry::new();
        registry.record(sample(OutcomeKind::Cancelled, 7));

        let report = registry.render(ReportFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(parsed[0]["outcome"], "cancelled");
        assert_eq!(parsed[0]["duration_ms"], 7);
    }

    #[test]
    fn test_empty_registry_renders() {
        let registry = MetricsRegistry::new();
        assert!(registry.render(ReportFormat::Plain).starts_with("activations: 0"));
        assert_eq!(registry.render(ReportFormat::Json).trim(), "[]");
    }
}
