//! Adaptive multi-connection download measurement.
//!
//! The phase runs in stages: a short calibration estimates the link speed,
//! the estimate selects duration, connection count and chunk size, then
//! every connection streams transfers into one shared byte counter while a
//! sampler records the aggregate speed. The overall average and the
//! steady-state tail of the samples are reconciled into the result.

use crate::backend::{DownloadTarget, Transport};
use crate::errors::{SpeedTestError, TransferError};
use crate::measurements::{
    calculate_speed, ByteAccumulator, Sample, SpeedSample, SpeedSampleRing,
};
use crate::progress::{Direction, ProgressCallback, ProgressEvent};
use crate::retry::{
    resilient_transfer_loop, LoopStats, PhaseBudget, RotationPolicy,
};
use crate::speedtest::adaptive::AdaptiveParameters;
use crate::speedtest::reconcile::{fallback_speed, ReconcileWeights};
use crate::speedtest::{Calibration, PhaseOutcome};
use futures::future::join_all;
use futures::StreamExt;
use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const MIB: u64 = 1_048_576;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Sizes of the sequential calibration transfers.
    pub calibration_sizes: Vec<u64>,
    pub calibration_timeout: Duration,
    /// Bound on the whole calibration step.
    pub calibration_budget: Duration,
    /// Lowest estimate handed to the adaptive parameters.
    pub floor_mbps: f64,
    pub sample_interval: Duration,
    pub ring_capacity: usize,
    /// Samples needed before the steady-state mean is trusted.
    pub min_steady_samples: usize,
    /// Share of the calibration estimate reported when reconciliation fails.
    pub fallback_factor: f64,
    pub policy: RotationPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            calibration_sizes: vec![MIB, 2 * MIB],
            calibration_timeout: Duration::from_secs(5),
            calibration_budget: Duration::from_secs(8),
            floor_mbps: 5.0,
            sample_interval: Duration::from_millis(150),
            ring_capacity: 30,
            min_steady_samples: 10,
            fallback_factor: 0.8,
            policy: RotationPolicy::DOWNLOAD,
        }
    }
}

/// Stages of the download phase, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    Calibrating,
    Sampling,
    Reconciling,
    Done,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub speed_mbps: f64,
    pub calibration: Calibration,
    pub parameters: AdaptiveParameters,
    pub total_bytes: u64,
    pub duration: Duration,
    /// One entry per completed transfer.
    pub samples: Vec<Sample>,
    pub speed_samples: Vec<SpeedSample>,
    pub attempts: u32,
    /// True when the reported speed is the calibration fallback.
    pub used_fallback: bool,
}

fn enter(stage: DownloadStage) {
    debug!("download: {:?}", stage);
}

/// Stream one transfer, adding chunk lengths to `accumulator` as they
/// arrive. Streaming stops early at `stop_at`.
async fn stream_transfer<T: Transport>(
    transport: &T,
    target: &DownloadTarget,
    bytes: u64,
    accumulator: &ByteAccumulator,
    stop_at: Instant,
) -> Result<u64, TransferError> {
    let mut body = transport.download(target, bytes).await?;
    let mut received = 0u64;

    loop {
        let chunk = tokio::select! {
            _ = sleep_until(stop_at) => break,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(len)) => {
                received += len as u64;
                accumulator.add(len as u64);
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(received)
}

/// Run the calibration transfers one after another over the endpoints.
pub async fn calibrate<T: Transport>(
    transport: &T,
    endpoints: &[DownloadTarget],
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Calibration {
    let deadline = Instant::now() + config.calibration_budget;
    let mut best: Option<f64> = None;
    let mut attempts = 0;

    for (i, &size) in config.calibration_sizes.iter().enumerate() {
        let Some(target) = endpoints.get(i % endpoints.len().max(1)) else {
            break;
        };
        if cancel.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        attempts += 1;
        let start = Instant::now();
        let bound = (start + config.calibration_timeout).min(deadline);
        let scratch = ByteAccumulator::new();

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = timeout_at(
                bound,
                stream_transfer(transport, target, size, &scratch, bound),
            ) => result.unwrap_or(Err(TransferError::Timeout)),
        };

        match result {
            Ok(bytes) if bytes > 0 => {
                let secs = start.elapsed().as_secs_f64();
                let speed = calculate_speed(bytes, secs);
                debug!(
                    "download calibration: {} bytes from {} at {:.2} Mbps",
                    bytes, target, speed
                );
                best = Some(best.map_or(speed, |b: f64| b.max(speed)));
            }
            Ok(_) => warn!("download calibration: {} sent no data", target),
            Err(e) => {
                warn!("download calibration against {} failed: {}", target, e)
            }
        }
    }

    let estimate_mbps = best.unwrap_or(0.0).max(config.floor_mbps);
    if best.is_none() {
        warn!(
            "download calibration failed, assuming {:.1} Mbps",
            config.floor_mbps
        );
    }

    Calibration { estimate_mbps, measured: best.is_some(), attempts }
}

/// Measure download throughput against `endpoints`.
pub async fn measure_download<T: Transport>(
    transport: &T,
    endpoints: &[DownloadTarget],
    config: &DownloadConfig,
    weights: &ReconcileWeights,
    cancel: &CancellationToken,
    progress: &dyn ProgressCallback,
) -> Result<PhaseOutcome<DownloadResult>, SpeedTestError> {
    if endpoints.is_empty() {
        return Err(SpeedTestError::config("no download endpoints configured"));
    }

    enter(DownloadStage::Calibrating);
    let calibration = calibrate(transport, endpoints, config, cancel).await;
    if cancel.is_cancelled() {
        return Ok(PhaseOutcome::Cancelled);
    }

    let parameters =
        AdaptiveParameters::for_download(calibration.estimate_mbps);
    info!(
        "download: estimate {:.2} Mbps, {} connections for {:?}, {} byte chunks",
        calibration.estimate_mbps,
        parameters.parallel_connections,
        parameters.test_duration,
        parameters.chunk_size_bytes
    );
    progress.on_progress(ProgressEvent::Calibrated {
        direction: Direction::Download,
        estimate_mbps: calibration.estimate_mbps,
        connections: parameters.parallel_connections,
        duration_secs: parameters.test_duration.as_secs_f64(),
    });

    enter(DownloadStage::Sampling);
    let accumulator = ByteAccumulator::new();
    let budget = PhaseBudget::new(parameters.test_duration, cancel.clone());
    let phase_start = Instant::now();
    let samples = RefCell::new(Vec::new());
    let workers_done = Cell::new(false);

    let workers = async {
        let accumulator = &accumulator;
        let samples = &samples;
        let budget = &budget;
        let policy = &config.policy;
        let deadline = budget.deadline;

        let connections = 0..parameters.parallel_connections;
        let loops = connections.map(move |connection_id| {
            resilient_transfer_loop(
                format!("download #{}", connection_id),
                endpoints.len(),
                connection_id,
                policy,
                budget,
                move |index| {
                    let target = &endpoints[index];
                    async move {
                        let start = Instant::now();
                        let bytes = stream_transfer(
                            transport,
                            target,
                            parameters.chunk_size_bytes,
                            accumulator,
                            deadline,
                        )
                        .await?;
                        Ok((bytes, start))
                    }
                },
                move |error, failures| policy.classify(error, failures),
                move |(bytes, start): (u64, Instant)| {
                    samples.borrow_mut().push(Sample::new(
                        bytes,
                        start.elapsed().as_secs_f64() * 1000.0,
                        phase_start.elapsed().as_secs_f64() * 1000.0,
                        connection_id,
                    ));
                    Duration::ZERO
                },
            )
        });

        let stats = join_all(loops).await;
        workers_done.set(true);
        stats
    };

    let sampler = async {
        let mut ring = SpeedSampleRing::new(config.ring_capacity);
        let mut ticker = interval_at(
            phase_start + config.sample_interval,
            config.sample_interval,
        );

        loop {
            tokio::select! {
                _ = budget.cancel.cancelled() => break,
                _ = sleep_until(budget.deadline) => break,
                _ = ticker.tick() => {}
            }
            if workers_done.get() {
                break;
            }

            let elapsed_secs = phase_start.elapsed().as_secs_f64();
            let bytes = accumulator.total();
            let speed_mbps = calculate_speed(bytes, elapsed_secs);
            ring.push(SpeedSample { elapsed_secs, speed_mbps });

            progress.on_progress(ProgressEvent::Throughput {
                direction: Direction::Download,
                speed_mbps,
                bytes,
                elapsed_secs,
            });
        }

        ring
    };

    let (stats, ring) = tokio::join!(workers, sampler);
    let stats = stats.into_iter().fold(LoopStats::default(), |mut acc, s| {
        acc.merge(s);
        acc
    });

    if cancel.is_cancelled() {
        return Ok(PhaseOutcome::Cancelled);
    }

    enter(DownloadStage::Reconciling);
    let duration = phase_start.elapsed();
    let total_bytes = accumulator.total();

    if total_bytes == 0 && !calibration.measured {
        let attempts = stats.attempts + calibration.attempts;
        let error = SpeedTestError::download_unavailable(format!(
            "no download succeeded after {} attempts against {} endpoints",
            attempts,
            endpoints.len()
        ));
        return Err(match stats.last_error {
            Some(source) => error.with_source(source),
            None => error,
        });
    }

    let overall = calculate_speed(total_bytes, duration.as_secs_f64());
    let steady_state = ring.steady_state_mean(config.min_steady_samples);
    let reconciled = weights.download(overall, steady_state);
    let used_fallback = reconciled.is_none();
    let speed_mbps = reconciled.unwrap_or_else(|| {
        fallback_speed(
            calibration.estimate_mbps,
            config.fallback_factor,
            config.floor_mbps,
        )
    });

    info!(
        "download: {:.2} Mbps (overall {:.2}, steady state {}, {} bytes in {:.2}s)",
        speed_mbps,
        overall,
        steady_state.map_or("n/a".to_string(), |v| format!("{:.2}", v)),
        total_bytes,
        duration.as_secs_f64()
    );
    enter(DownloadStage::Done);

    Ok(PhaseOutcome::Completed(DownloadResult {
        speed_mbps,
        calibration,
        parameters,
        total_bytes,
        duration,
        samples: samples.into_inner(),
        speed_samples: ring.to_vec(),
        attempts: stats.attempts + calibration.attempts,
        used_fallback,
    }))
}
