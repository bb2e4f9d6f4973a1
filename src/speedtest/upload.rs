//! Adaptive multi-connection upload measurement.
//!
//! Upload timing is harder to observe than download timing: the response
//! only arrives after the server has read the whole body, so a request's
//! round trip includes server processing. Transports therefore report
//! progress events while the body is handed off, and the send window
//! between the first and last event is used where it is more telling than
//! the round trip. Hand-off is not delivery, so that window is only trusted
//! up to the speed the round trip allows.

use crate::backend::requests::upload::payload;
use crate::backend::{SendProgress, Transport};
use crate::errors::{SpeedTestError, TransferError};
use crate::measurements::{
    calculate_speed, ByteAccumulator, Sample, SpeedSample, SpeedSampleRing,
};
use crate::progress::{Direction, ProgressCallback, ProgressEvent};
use crate::retry::{
    resilient_transfer_loop, LoopStats, PhaseBudget, RotationPolicy,
};
use crate::speedtest::adaptive::AdaptiveParameters;
use crate::speedtest::reconcile::{
    fallback_speed, ReconcileWeights, UploadSignals,
};
use crate::speedtest::{Calibration, PhaseOutcome};
use crate::stats::{median_f64, percentile_f64};
use bytes::Bytes;
use futures::future::join_all;
use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

const KIB: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Payload sizes of the sequential calibration uploads.
    pub calibration_sizes: Vec<usize>,
    pub calibration_timeout: Duration,
    pub calibration_budget: Duration,
    pub floor_mbps: f64,
    pub sample_interval: Duration,
    pub ring_capacity: usize,
    /// Share of requests, latest first, that count as steady state.
    pub steady_state_share: f64,
    pub peak_percentile: f64,
    /// The send-window speed replaces the round-trip speed only when it is
    /// larger by at least this factor.
    pub progress_advantage: f64,
    /// Estimated share of a round trip spent sending, used when the
    /// transport reports no progress.
    pub send_share_of_round_trip: f64,
    pub fallback_factor: f64,
    pub policy: RotationPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            calibration_sizes: vec![512 * KIB, 1024 * KIB],
            calibration_timeout: Duration::from_secs(5),
            calibration_budget: Duration::from_secs(8),
            floor_mbps: 1.0,
            sample_interval: Duration::from_millis(150),
            ring_capacity: 30,
            steady_state_share: 0.6,
            peak_percentile: 0.9,
            progress_advantage: 1.1,
            send_share_of_round_trip: 0.88,
            fallback_factor: 0.8,
            policy: RotationPolicy::UPLOAD,
        }
    }
}

/// Bytes handed to the connection between the first and the last progress
/// event of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    pub bytes: u64,
    pub duration: Duration,
}

impl SendWindow {
    /// Each event announces bytes about to be sent, so the bytes of the
    /// last event are not yet confirmed when it fires.
    pub fn from_events(events: &[SendProgress]) -> Option<Self> {
        let (first, last) = (events.first()?, events.last()?);
        let duration = last.at.saturating_duration_since(first.at);
        let bytes: u64 = events[..events.len() - 1]
            .iter()
            .map(|event| event.bytes as u64)
            .sum();

        if duration.is_zero() || bytes == 0 {
            return None;
        }

        Some(Self { bytes, duration })
    }

    pub fn speed_mbps(&self) -> f64 {
        calculate_speed(self.bytes, self.duration.as_secs_f64())
    }
}

/// One completed upload request.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub connection_id: usize,
    pub bytes: u64,
    pub started: Instant,
    pub finished: Instant,
    pub window: Option<SendWindow>,
    /// Length echoed by the acceptor, if any.
    pub acknowledged_bytes: Option<u64>,
}

impl UploadRecord {
    pub fn round_trip(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    /// Hand-off events can run far ahead of the wire while the body fits in
    /// socket buffers, so the send-window speed never exceeds what the
    /// round trip allows for the sending share.
    pub fn speed_mbps(&self, config: &UploadConfig) -> f64 {
        let round_trip = self.round_trip().as_secs_f64();

        match self.window {
            Some(window) => {
                let end_to_end = calculate_speed(self.bytes, round_trip);
                let ceiling = end_to_end / config.send_share_of_round_trip;
                let sending = window.speed_mbps().min(ceiling);
                if sending > end_to_end * config.progress_advantage {
                    sending
                } else {
                    end_to_end
                }
            }
            None => calculate_speed(
                self.bytes,
                round_trip * config.send_share_of_round_trip,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub speed_mbps: f64,
    pub calibration: Calibration,
    pub parameters: AdaptiveParameters,
    pub signals: UploadSignals,
    pub total_bytes: u64,
    pub duration: Duration,
    pub samples: Vec<Sample>,
    pub speed_samples: Vec<SpeedSample>,
    pub attempts: u32,
    pub used_fallback: bool,
}

/// Pause before a connection's next request. Very short requests are
/// spaced out a little so they do not monopolise the event loop.
pub fn inter_request_delay(round_trip: Duration) -> Duration {
    if round_trip < Duration::from_millis(50) {
        Duration::from_millis(5)
    } else if round_trip < Duration::from_millis(250) {
        Duration::from_millis(1)
    } else {
        Duration::ZERO
    }
}

fn observe(
    event: SendProgress,
    events: &mut Vec<SendProgress>,
    accumulator: &ByteAccumulator,
) {
    accumulator.add(event.bytes as u64);
    events.push(event);
}

/// POST one payload, following its progress events as they arrive.
async fn send_upload<T: Transport>(
    transport: &T,
    endpoint: &Url,
    body: Bytes,
    connection_id: usize,
    accumulator: &ByteAccumulator,
) -> Result<UploadRecord, TransferError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bytes = body.len() as u64;
    let mut events = Vec::new();
    let started = Instant::now();

    let upload = transport.upload(endpoint, body, tx);
    tokio::pin!(upload);

    let receipt = loop {
        tokio::select! {
            biased;
            Some(event) = rx.recv() => {
                observe(event, &mut events, accumulator);
            }
            result = &mut upload => break result?,
        }
    };
    let finished = Instant::now();

    rx.close();
    while let Ok(event) = rx.try_recv() {
        observe(event, &mut events, accumulator);
    }
    if events.is_empty() {
        accumulator.add(bytes);
    }

    if let Some(received) = receipt.received_bytes {
        if received != bytes {
            debug!("{} acknowledged {} of {} bytes", endpoint, received, bytes);
        }
    }

    Ok(UploadRecord {
        connection_id,
        bytes,
        started,
        finished,
        window: SendWindow::from_events(&events),
        acknowledged_bytes: receipt.received_bytes,
    })
}

/// Run the calibration uploads one after another over the endpoints.
pub async fn calibrate<T: Transport>(
    transport: &T,
    endpoints: &[Url],
    config: &UploadConfig,
    cancel: &CancellationToken,
) -> Calibration {
    let deadline = Instant::now() + config.calibration_budget;
    let mut best: Option<f64> = None;
    let mut attempts = 0;

    for (i, &size) in config.calibration_sizes.iter().enumerate() {
        let Some(endpoint) = endpoints.get(i % endpoints.len().max(1)) else {
            break;
        };
        if cancel.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        attempts += 1;
        let bound = (Instant::now() + config.calibration_timeout).min(deadline);
        let scratch = ByteAccumulator::new();
        let body = Bytes::from(payload(size));

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = timeout_at(
                bound,
                send_upload(transport, endpoint, body, 0, &scratch),
            ) => result.unwrap_or(Err(TransferError::Timeout)),
        };

        match result {
            Ok(record) => {
                let speed = record.speed_mbps(config);
                debug!(
                    "upload calibration: {} bytes to {} at {:.2} Mbps",
                    record.bytes, endpoint, speed
                );
                best = Some(best.map_or(speed, |b: f64| b.max(speed)));
            }
            Err(e) => {
                warn!("upload calibration against {} failed: {}", endpoint, e)
            }
        }
    }

    if best.is_none() {
        warn!(
            "upload calibration failed, assuming {:.1} Mbps",
            config.floor_mbps
        );
    }

    Calibration {
        estimate_mbps: best.unwrap_or(0.0).max(config.floor_mbps),
        measured: best.is_some(),
        attempts,
    }
}

/// Compute the four reconciliation signals of a finished sampling stage.
///
/// `sampled` holds the aggregate speeds recorded by the sampler.
pub fn upload_signals(
    records: &[UploadRecord],
    sampled: &[f64],
    total_bytes: u64,
    duration: Duration,
    config: &UploadConfig,
) -> UploadSignals {
    let overall = Some(calculate_speed(total_bytes, duration.as_secs_f64()))
        .filter(|v| *v > 0.0);

    // connections that gave up early contribute nothing to the aggregate
    let connections: HashSet<usize> =
        records.iter().map(|r| r.connection_id).collect();
    let mut speeds: Vec<f64> =
        records.iter().map(|r| r.speed_mbps(config)).collect();
    let median_scaled = median_f64(&mut speeds)
        .map(|median| median * connections.len() as f64);

    let mut sampled = sampled.to_vec();
    let peak = percentile_f64(&mut sampled, config.peak_percentile)
        .filter(|v| *v > 0.0);

    UploadSignals {
        overall,
        median_scaled,
        steady_state: steady_state_speed(records, config.steady_state_share),
        peak,
    }
}

/// Aggregate speed over the latest `share` of requests by completion time.
fn steady_state_speed(records: &[UploadRecord], share: f64) -> Option<f64> {
    let mut sorted: Vec<&UploadRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.finished);

    let skip = (sorted.len() as f64 * (1.0 - share.clamp(0.0, 1.0))).floor();
    let later = &sorted[(skip as usize).min(sorted.len())..];

    let first_start = later.iter().map(|r| r.started).min()?;
    let last_finish = later.iter().map(|r| r.finished).max()?;
    let bytes: u64 = later.iter().map(|r| r.bytes).sum();

    Some(calculate_speed(
        bytes,
        last_finish.saturating_duration_since(first_start).as_secs_f64(),
    ))
    .filter(|v| *v > 0.0)
}

/// Measure upload throughput against `endpoints`.
pub async fn measure_upload<T: Transport>(
    transport: &T,
    endpoints: &[Url],
    config: &UploadConfig,
    weights: &ReconcileWeights,
    cancel: &CancellationToken,
    progress: &dyn ProgressCallback,
) -> Result<PhaseOutcome<UploadResult>, SpeedTestError> {
    if endpoints.is_empty() {
        return Err(SpeedTestError::config("no upload endpoints configured"));
    }

    let calibration = calibrate(transport, endpoints, config, cancel).await;
    if cancel.is_cancelled() {
        return Ok(PhaseOutcome::Cancelled);
    }

    let parameters = AdaptiveParameters::for_upload(calibration.estimate_mbps);
    info!(
        "upload: estimate {:.2} Mbps, {} connections for {:?}, {} byte payloads",
        calibration.estimate_mbps,
        parameters.parallel_connections,
        parameters.test_duration,
        parameters.chunk_size_bytes
    );
    progress.on_progress(ProgressEvent::Calibrated {
        direction: Direction::Upload,
        estimate_mbps: calibration.estimate_mbps,
        connections: parameters.parallel_connections,
        duration_secs: parameters.test_duration.as_secs_f64(),
    });

    let body = Bytes::from(payload(parameters.chunk_size_bytes as usize));
    let accumulator = ByteAccumulator::new();
    let records = RefCell::new(Vec::new());
    let budget = PhaseBudget::new(parameters.test_duration, cancel.clone());
    let phase_start = Instant::now();
    let workers_done = Cell::new(false);

    let workers = async {
        let body = &body;
        let accumulator = &accumulator;
        let records = &records;
        let budget = &budget;
        let policy = &config.policy;

        let connections = 0..parameters.parallel_connections;
        let loops = connections.map(move |connection_id| {
            resilient_transfer_loop(
                format!("upload #{}", connection_id),
                endpoints.len(),
                connection_id,
                policy,
                budget,
                move |index| {
                    send_upload(
                        transport,
                        &endpoints[index],
                        body.clone(),
                        connection_id,
                        accumulator,
                    )
                },
                move |error, failures| policy.classify(error, failures),
                move |record: UploadRecord| {
                    let delay = inter_request_delay(record.round_trip());
                    records.borrow_mut().push(record);
                    delay
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
                direction: Direction::Upload,
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

    let duration = phase_start.elapsed();
    let records = records.into_inner();
    let attempts = stats.attempts + calibration.attempts;

    if records.is_empty() && !calibration.measured {
        let error = SpeedTestError::upload_unavailable(format!(
            "no upload succeeded after {} attempts against {} endpoints",
            attempts,
            endpoints.len()
        ));
        return Err(match stats.last_error {
            Some(source) => error.with_source(source),
            None => error,
        });
    }

    let total_bytes = accumulator.total();
    let signals = upload_signals(
        &records,
        &ring.speeds(),
        total_bytes,
        duration,
        config,
    );
    debug!("upload signals: {:?}", signals);

    let reconciled = weights.upload(&signals);
    let used_fallback = reconciled.is_none();
    let speed_mbps = reconciled.unwrap_or_else(|| {
        fallback_speed(
            calibration.estimate_mbps,
            config.fallback_factor,
            config.floor_mbps,
        )
    });

    info!(
        "upload: {:.2} Mbps from {} requests, {} bytes in {:.2}s",
        speed_mbps,
        records.len(),
        total_bytes,
        duration.as_secs_f64()
    );

    let samples = records
        .iter()
        .map(|r| {
            Sample::new(
                r.bytes,
                r.round_trip().as_secs_f64() * 1000.0,
                r.finished.saturating_duration_since(phase_start).as_secs_f64()
                    * 1000.0,
                r.connection_id,
            )
        })
        .collect();

    Ok(PhaseOutcome::Completed(UploadResult {
        speed_mbps,
        calibration,
        parameters,
        signals,
        total_bytes,
        duration,
        samples,
        speed_samples: ring.to_vec(),
        attempts,
        used_fallback,
    }))
}
