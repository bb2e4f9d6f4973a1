//! Progress event types and callback interface.
//!
//! The engine emits these while a run is in flight so a presentation layer
//! can show live values. Callbacks are invoked inline on the engine task.

/// Phases of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Latency,
    Download,
    Upload,
    Complete,
}

/// Direction of a throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Progress events emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A new phase started.
    PhaseChange(TestPhase),
    /// A latency probe finished.
    LatencyProbe {
        /// Round trip in milliseconds, `None` if the probe was discarded.
        value_ms: Option<f64>,
        /// Probe number (1-indexed).
        current: usize,
        total: usize,
    },
    /// Calibration picked the parameters for a throughput phase.
    Calibrated {
        direction: Direction,
        estimate_mbps: f64,
        connections: usize,
        duration_secs: f64,
    },
    /// Current aggregate speed of a throughput phase.
    Throughput {
        direction: Direction,
        speed_mbps: f64,
        bytes: u64,
        elapsed_secs: f64,
    },
    /// A phase finished with its headline value (ms or Mbps).
    PhaseComplete { phase: TestPhase, value: f64 },
}

/// Callback interface for progress updates.
///
/// Implementations must be non-blocking to avoid affecting measurement
/// accuracy.
pub trait ProgressCallback {
    fn on_progress(&self, event: ProgressEvent);
}

/// Callback that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}
