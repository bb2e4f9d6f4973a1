//! The measurement engine.
//!
//! A run goes through latency, download and upload phases in order. Each
//! throughput phase calibrates first, derives its [`AdaptiveParameters`]
//! from the estimate, then drives several connections against the
//! configured endpoints while sampling the shared byte total.

pub mod adaptive;
pub mod download;
pub mod engine;
pub mod latency;
pub mod reconcile;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use adaptive::AdaptiveParameters;
pub use download::{measure_download, DownloadConfig, DownloadResult};
pub use engine::{RunOutcome, TestConfig, TestEngine, TestRunState};
pub use latency::{measure_latency, LatencyConfig, LatencyResult};
pub use reconcile::ReconcileWeights;
pub use upload::{measure_upload, UploadConfig, UploadResult};

/// How a single phase ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome<T> {
    Completed(T),
    /// The run's cancellation token fired while the phase was in flight.
    Cancelled,
}

/// Result of the sequential calibration transfers of a throughput phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Estimated speed in Mbps, never below the phase's floor.
    pub estimate_mbps: f64,
    /// False when every calibration transfer failed and the estimate is
    /// the floor.
    pub measured: bool,
    pub attempts: u32,
}
