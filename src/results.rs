//! Result data structures for a test run.
//!
//! [`TestRunResult`] is what the engine hands to the presentation layer.
//! [`SpeedReport`] adds the derived values (MB/s rates, speed labels and
//! use-case scores) and is what `--json` prints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scoring::{
    calculate_scores, megabytes_per_second, ConnectionMetrics, SpeedQuality,
    UseCaseScores,
};

/// Phases that produce a headline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Ping,
    Download,
    Upload,
}

/// Headline value of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestPhaseResult {
    pub phase: Phase,
    /// Milliseconds for [`Phase::Ping`], Mbps otherwise.
    pub value: f64,
    pub sample_count: usize,
    pub duration_ms: f64,
}

impl TestPhaseResult {
    pub fn new(
        phase: Phase,
        value: f64,
        sample_count: usize,
        duration_ms: f64,
    ) -> Self {
        Self { phase, value, sample_count, duration_ms }
    }
}

/// Complete result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRunResult {
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub download_mbps: f64,
    /// `None` when the upload phase was not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_mbps: Option<f64>,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    pub phases: Vec<TestPhaseResult>,
    /// False when no latency probe was usable and `ping_ms` is the
    /// sentinel.
    pub latency_available: bool,
}

impl TestRunResult {
    pub fn phase(&self, phase: Phase) -> Option<&TestPhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Scoring inputs. The ping sentinel never reaches the scores.
    pub fn metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics::new(
            self.download_mbps,
            self.upload_mbps,
            self.latency_available.then_some(self.ping_ms),
            self.latency_available.then_some(self.jitter_ms),
        )
    }
}

/// Speed of one direction with its derived display values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionReport {
    pub speed_mbps: f64,
    pub megabytes_per_second: f64,
    pub quality: &'static str,
}

impl DirectionReport {
    pub fn new(speed_mbps: f64) -> Self {
        Self {
            speed_mbps,
            megabytes_per_second: megabytes_per_second(speed_mbps),
            quality: SpeedQuality::from_mbps(speed_mbps).description(),
        }
    }
}

/// Serialisable report of a run, with scores.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedReport {
    pub timestamp: DateTime<Utc>,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub latency_available: bool,
    pub download: DirectionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<DirectionReport>,
    pub phases: Vec<TestPhaseResult>,
    pub scores: UseCaseScores,
    /// Server description from the status endpoint, when one was queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl SpeedReport {
    pub fn from_result(result: &TestRunResult) -> Self {
        Self {
            timestamp: result.timestamp,
            ping_ms: result.ping_ms,
            jitter_ms: result.jitter_ms,
            latency_available: result.latency_available,
            download: DirectionReport::new(result.download_mbps),
            upload: result.upload_mbps.map(DirectionReport::new),
            phases: result.phases.clone(),
            scores: calculate_scores(&result.metrics()),
            server: None,
        }
    }

    pub fn with_server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }
}
