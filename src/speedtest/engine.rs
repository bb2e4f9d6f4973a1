//! Run orchestration.
//!
//! [`TestEngine`] sequences the latency, download and upload phases over a
//! [`Transport`], owns the run state and the cancellation token of the run
//! in flight, and keeps the last completed result.

use crate::backend::{Endpoints, Transport};
use crate::errors::SpeedTestError;
use crate::progress::{NoProgress, ProgressCallback, ProgressEvent, TestPhase};
use crate::results::{Phase, TestPhaseResult, TestRunResult};
use crate::speedtest::download::{measure_download, DownloadConfig};
use crate::speedtest::latency::{measure_latency, LatencyConfig};
use crate::speedtest::reconcile::ReconcileWeights;
use crate::speedtest::upload::{measure_upload, UploadConfig};
use crate::speedtest::PhaseOutcome;
use chrono::Utc;
use log::{info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Configuration for the test engine.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub endpoints: Endpoints,
    pub latency: LatencyConfig,
    pub download: DownloadConfig,
    pub upload: UploadConfig,
    pub weights: ReconcileWeights,
    /// Skip the upload phase when false.
    pub run_upload: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            latency: LatencyConfig::default(),
            download: DownloadConfig::default(),
            upload: UploadConfig::default(),
            weights: ReconcileWeights::default(),
            run_upload: true,
        }
    }
}

/// Lifecycle of the engine. `Cancelled` lasts only while a cancelled run
/// winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRunState {
    Idle,
    Running,
    Cancelled,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(TestRunResult),
    Cancelled,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The engine that drives complete test runs.
///
/// # Example
/// ```no_run
/// use eru_speed::backend::HttpTransport;
/// use eru_speed::speedtest::{RunOutcome, TestConfig, TestEngine};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = HttpTransport::new()?;
///     let engine = TestEngine::new(transport, TestConfig::default());
///     if let RunOutcome::Completed(result) = engine.run().await? {
///         println!("Download: {:.2} Mbps", result.download_mbps);
///     }
///     Ok(())
/// }
/// ```
pub struct TestEngine<T: Transport> {
    transport: T,
    config: TestConfig,
    state: Mutex<TestRunState>,
    current: Mutex<Option<CancellationToken>>,
    last_result: Mutex<Option<TestRunResult>>,
}

/// Returns the engine to `Idle` however the run ends.
struct RunGuard<'a, T: Transport> {
    engine: &'a TestEngine<T>,
}

impl<T: Transport> Drop for RunGuard<'_, T> {
    fn drop(&mut self) {
        *lock(&self.engine.current) = None;
        *lock(&self.engine.state) = TestRunState::Idle;
    }
}

impl<T: Transport> TestEngine<T> {
    pub fn new(transport: T, config: TestConfig) -> Self {
        Self {
            transport,
            config,
            state: Mutex::new(TestRunState::Idle),
            current: Mutex::new(None),
            last_result: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn state(&self) -> TestRunState {
        *lock(&self.state)
    }

    /// The result of the last run that completed.
    pub fn last_result(&self) -> Option<TestRunResult> {
        lock(&self.last_result).clone()
    }

    /// Cancel the run in flight, if any. The run stops issuing requests,
    /// aborts the ones in flight and resolves to [`RunOutcome::Cancelled`].
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if *state != TestRunState::Running {
            return;
        }

        if let Some(token) = lock(&self.current).as_ref() {
            info!("cancelling test run");
            token.cancel();
        }
        *state = TestRunState::Cancelled;
    }

    pub async fn run(&self) -> Result<RunOutcome, SpeedTestError> {
        self.run_with_progress(&NoProgress).await
    }

    /// Run latency, download and upload in order, reporting live values to
    /// `progress`.
    ///
    /// Fails with `AlreadyRunning` if another run is in flight, and with
    /// `DownloadUnavailable`/`UploadUnavailable` when every endpoint of a
    /// throughput phase was exhausted. No usable latency probe does not
    /// fail the run.
    pub async fn run_with_progress(
        &self,
        progress: &dyn ProgressCallback,
    ) -> Result<RunOutcome, SpeedTestError> {
        let cancel = self.begin()?;
        let _guard = RunGuard { engine: self };

        let outcome = self.execute(&cancel, progress).await?;
        if let RunOutcome::Completed(ref result) = outcome {
            *lock(&self.last_result) = Some(result.clone());
        }

        Ok(outcome)
    }

    fn begin(&self) -> Result<CancellationToken, SpeedTestError> {
        let mut state = lock(&self.state);
        if *state != TestRunState::Idle {
            return Err(SpeedTestError::already_running());
        }

        let token = CancellationToken::new();
        *lock(&self.current) = Some(token.clone());
        *state = TestRunState::Running;

        Ok(token)
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        progress: &dyn ProgressCallback,
    ) -> Result<RunOutcome, SpeedTestError> {
        let config = &self.config;
        let transport = &self.transport;
        let mut phases = Vec::with_capacity(3);

        info!("starting test run");

        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Latency));
        let latency = measure_latency(
            transport,
            &config.endpoints.ping,
            &config.latency,
            cancel,
            progress,
        )
        .await;
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        if !latency.is_available() {
            let error = SpeedTestError::latency_unavailable(format!(
                "none of {} probes produced a usable timing",
                latency.probes_sent
            ));
            warn!("{}", error);
        }
        progress.on_progress(ProgressEvent::PhaseComplete {
            phase: TestPhase::Latency,
            value: latency.ping_ms,
        });
        phases.push(TestPhaseResult::new(
            Phase::Ping,
            latency.ping_ms,
            latency.samples.len(),
            latency.duration.as_secs_f64() * 1000.0,
        ));

        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Download));
        let download = match measure_download(
            transport,
            &config.endpoints.download,
            &config.download,
            &config.weights,
            cancel,
            progress,
        )
        .await?
        {
            PhaseOutcome::Completed(download) => download,
            PhaseOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
        };
        progress.on_progress(ProgressEvent::PhaseComplete {
            phase: TestPhase::Download,
            value: download.speed_mbps,
        });
        phases.push(TestPhaseResult::new(
            Phase::Download,
            download.speed_mbps,
            download.samples.len(),
            download.duration.as_secs_f64() * 1000.0,
        ));

        let upload_mbps = if config.run_upload {
            progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Upload));
            let upload = match measure_upload(
                transport,
                &config.endpoints.upload,
                &config.upload,
                &config.weights,
                cancel,
                progress,
            )
            .await?
            {
                PhaseOutcome::Completed(upload) => upload,
                PhaseOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
            };
            progress.on_progress(ProgressEvent::PhaseComplete {
                phase: TestPhase::Upload,
                value: upload.speed_mbps,
            });
            phases.push(TestPhaseResult::new(
                Phase::Upload,
                upload.speed_mbps,
                upload.samples.len(),
                upload.duration.as_secs_f64() * 1000.0,
            ));
            Some(upload.speed_mbps)
        } else {
            None
        };

        progress.on_progress(ProgressEvent::PhaseChange(TestPhase::Complete));

        let result = TestRunResult {
            ping_ms: latency.ping_ms,
            jitter_ms: latency.jitter_ms,
            download_mbps: download.speed_mbps,
            upload_mbps,
            timestamp: Utc::now(),
            phases,
            latency_available: latency.is_available(),
        };

        info!(
            "test run complete: ping {:.1} ms, download {:.2} Mbps, upload {}",
            result.ping_ms,
            result.download_mbps,
            result
                .upload_mbps
                .map_or("skipped".to_string(), |v| format!("{:.2} Mbps", v))
        );

        Ok(RunOutcome::Completed(result))
    }
}
