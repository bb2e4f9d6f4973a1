//! Round-trip latency and jitter.
//!
//! Probes are sent one at a time, rotating over the configured endpoints.
//! Every probe is timed whether it succeeds or not: an error that comes back
//! quickly still measured a round trip. Implausible timings are discarded
//! before the statistics are computed.

use crate::backend::Transport;
use crate::measurements::{interquartile_mean, jitter};
use crate::progress::{ProgressCallback, ProgressEvent};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Ping reported when no probe produced a usable timing.
pub const UNAVAILABLE_PING_MS: f64 = 999.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyConfig {
    pub probe_count: usize,
    /// Pause after each probe.
    pub probe_delay: Duration,
    pub probe_timeout: Duration,
    /// Successful probes at or above this are discarded.
    pub success_ceiling_ms: f64,
    /// Failed probes at or above this are discarded.
    pub failure_ceiling_ms: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            probe_count: 20,
            probe_delay: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(2),
            success_ceiling_ms: 1000.0,
            failure_ceiling_ms: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyResult {
    pub ping_ms: f64,
    pub jitter_ms: f64,
    /// Kept probe timings in probe order.
    pub samples: Vec<f64>,
    pub probes_sent: usize,
    pub duration: Duration,
}

impl LatencyResult {
    pub fn is_available(&self) -> bool {
        !self.samples.is_empty()
    }
}

impl LatencyConfig {
    fn keeps(&self, elapsed_ms: f64, succeeded: bool) -> bool {
        let ceiling = if succeeded {
            self.success_ceiling_ms
        } else {
            self.failure_ceiling_ms
        };

        elapsed_ms > 0.0 && elapsed_ms < ceiling
    }
}

/// Probe `endpoints` in rotation and reduce the timings to ping and jitter.
///
/// Stops early on cancellation; the result then covers the probes sent so
/// far.
pub async fn measure_latency<T: Transport>(
    transport: &T,
    endpoints: &[Url],
    config: &LatencyConfig,
    cancel: &CancellationToken,
    progress: &dyn ProgressCallback,
) -> LatencyResult {
    let started = Instant::now();
    let mut samples = Vec::with_capacity(config.probe_count);
    let mut probes_sent = 0;

    if endpoints.is_empty() {
        warn!("no latency endpoints configured");
    }

    for (i, endpoint) in
        endpoints.iter().cycle().take(config.probe_count).enumerate()
    {
        if cancel.is_cancelled() {
            break;
        }

        let t0 = Instant::now();
        let probe = timeout(config.probe_timeout, transport.probe(endpoint));
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = probe => result,
        };
        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        probes_sent += 1;

        let succeeded = matches!(result, Ok(Ok(())));
        if let Ok(Err(ref e)) = result {
            debug!(
                "probe {} to {} failed after {:.1} ms: {}",
                i + 1,
                endpoint,
                elapsed_ms,
                e
            );
        }

        let kept = config.keeps(elapsed_ms, succeeded);
        if kept {
            samples.push(elapsed_ms);
        } else {
            debug!("discarding probe {} ({:.1} ms)", i + 1, elapsed_ms);
        }

        progress.on_progress(ProgressEvent::LatencyProbe {
            value_ms: kept.then_some(elapsed_ms),
            current: i + 1,
            total: config.probe_count,
        });

        if i + 1 < config.probe_count {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(config.probe_delay) => {}
            }
        }
    }

    let result = match interquartile_mean(&samples) {
        Some(ping_ms) => LatencyResult {
            ping_ms,
            jitter_ms: jitter(&samples),
            samples,
            probes_sent,
            duration: started.elapsed(),
        },
        None => LatencyResult {
            ping_ms: UNAVAILABLE_PING_MS,
            jitter_ms: 0.0,
            samples,
            probes_sent,
            duration: started.elapsed(),
        },
    };

    info!(
        "latency: ping {:.1} ms, jitter {:.1} ms from {}/{} probes",
        result.ping_ms,
        result.jitter_ms,
        result.samples.len(),
        result.probes_sent
    );

    result
}
