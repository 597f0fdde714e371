//! Statistics collection and export.
//!
//! Every atomic engine counts its transitions in a [`TransitionStats`];
//! real-time engines additionally keep [`RtStats`] about their timers. At the
//! end of a run the counters are gathered from the [`ModelReport`] tree into
//! a [`RunSummary`] that can be exported as JSON, CSV or text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::model::ModelReport;
use crate::types::ModelUri;

/// Transition counters of one atomic engine (or the sum over a subtree).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStats {
    /// Internal transitions executed
    pub internal: u64,
    /// External transitions executed
    pub external: u64,
    /// Confluent transitions executed
    pub confluent: u64,
    /// Causal (continuous refresh) transitions executed
    pub causal: u64,
    /// External events stored
    pub events_received: u64,
    /// Events produced by output functions
    pub events_emitted: u64,
}

impl TransitionStats {
    /// Total number of transitions of any kind.
    pub fn transitions(&self) -> u64 {
        self.internal + self.external + self.confluent + self.causal
    }

    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &TransitionStats) {
        self.internal += other.internal;
        self.external += other.external;
        self.confluent += other.confluent;
        self.causal += other.causal;
        self.events_received += other.events_received;
        self.events_emitted += other.events_emitted;
    }
}

/// Timer bookkeeping of one real-time engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtStats {
    /// Internal-transition timers handed to the scheduler
    pub timers_scheduled: u64,
    /// Timers cancelled because an external or causal arrival came first
    pub timers_cancelled: u64,
    /// Callbacks that fired after being superseded
    pub stale_callbacks: u64,
    /// Deadlines already in the past when scheduled
    pub clamped_delays: u64,
    /// Arrivals stamped before the engine's last event
    pub late_arrivals: u64,
}

impl RtStats {
    pub fn merge(&mut self, other: &RtStats) {
        self.timers_scheduled += other.timers_scheduled;
        self.timers_cancelled += other.timers_cancelled;
        self.stale_callbacks += other.stale_callbacks;
        self.clamped_delays += other.clamped_delays;
        self.late_arrivals += other.late_arrivals;
    }
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Simulation name/description
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,

    /// Configuration file used (if any)
    pub config_file: Option<String>,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated seconds per wall-clock second
    pub sim_time_per_second: f64,

    /// Transitions per wall-clock second
    pub transitions_per_second: f64,
}

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,

    /// Simulated seconds covered by the run
    pub simulated_secs: f64,

    /// Sum over all atomic models
    pub totals: TransitionStats,

    /// Per atomic model
    pub models: BTreeMap<ModelUri, TransitionStats>,

    pub timing: TimingStats,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            metadata: RunMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..RunMetadata::default()
            },
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(timestamp_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(timestamp_now());
    }

    /// Gathers the per-model counters of the atomic leaves of `report`.
    pub fn collect_report(&mut self, report: &ModelReport) {
        if report.children.is_empty() {
            self.models.insert(report.model_uri.clone(), report.stats);
            self.totals.merge(&report.stats);
        } else {
            for child in &report.children {
                self.collect_report(child);
            }
        }
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;
        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = self.simulated_secs / seconds;
            self.timing.transitions_per_second = self.totals.transitions() as f64 / seconds;
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("metric,value\n");
        let _ = writeln!(csv, "simulated_secs,{}", self.simulated_secs);
        let _ = writeln!(csv, "internal,{}", self.totals.internal);
        let _ = writeln!(csv, "external,{}", self.totals.external);
        let _ = writeln!(csv, "confluent,{}", self.totals.confluent);
        let _ = writeln!(csv, "causal,{}", self.totals.causal);
        let _ = writeln!(csv, "events_received,{}", self.totals.events_received);
        let _ = writeln!(csv, "events_emitted,{}", self.totals.events_emitted);
        let _ = writeln!(csv, "model_count,{}", self.models.len());
        let _ = writeln!(csv, "wall_time_ms,{:.2}", self.timing.total_wall_time_ms);
        let _ = writeln!(csv, "sim_time_per_second,{:.2}", self.timing.sim_time_per_second);
        let _ = writeln!(csv, "transitions_per_second,{:.2}", self.timing.transitions_per_second);
        csv
    }

    /// Exports per-model statistics to CSV.
    pub fn models_to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("model,internal,external,confluent,causal,events_received,events_emitted\n");
        for (uri, s) in &self.models {
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{},{}",
                uri, s.internal, s.external, s.confluent, s.causal, s.events_received, s.events_emitted
            );
        }
        csv
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let title = if self.metadata.name.is_empty() { "run" } else { self.metadata.name.as_str() };
        let _ = writeln!(out, "{title}: {:.3} s simulated in {:.2} ms", self.simulated_secs, self.timing.total_wall_time_ms);
        let t = &self.totals;
        let _ = writeln!(
            out,
            "transitions: internal {} external {} confluent {} causal {} ({:.0}/s)",
            t.internal, t.external, t.confluent, t.causal, self.timing.transitions_per_second
        );
        let _ = writeln!(out, "events: received {} emitted {}", t.events_received, t.events_emitted);
        for (uri, s) in &self.models {
            let _ = writeln!(
                out,
                "  {uri}: int {} ext {} conf {} causal {}",
                s.internal, s.external, s.confluent, s.causal
            );
        }
        out
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn timestamp_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Times a run and builds its [`RunSummary`].
#[derive(Debug, Default)]
pub struct StatsCollector {
    summary: RunSummary,
    timer: Option<Timer>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            summary: RunSummary::new(),
            timer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.summary.metadata.name = name.into();
    }

    pub fn set_config_file(&mut self, path: impl Into<String>) {
        self.summary.metadata.config_file = Some(path.into());
    }

    /// Starts timing.
    pub fn start(&mut self) {
        self.timer = Some(Timer::start());
        self.summary.record_start();
    }

    /// Stops timing and computes final statistics from the run's report.
    pub fn stop(&mut self, report: &ModelReport, simulated_secs: f64) {
        self.summary.record_end();
        self.summary.simulated_secs = simulated_secs;
        self.summary.collect_report(report);
        if let Some(ref timer) = self.timer {
            self.summary.compute_timing(timer.elapsed_ms());
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }
}
