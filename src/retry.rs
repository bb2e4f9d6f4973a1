//! Retry and endpoint rotation for sustained transfers.
//!
//! Every throughput connection runs [`resilient_transfer_loop`]: it keeps
//! issuing transfers until the phase budget runs out, retrying a failing
//! endpoint a few times before rotating to the next one. A single
//! connection giving up never fails the phase.

use crate::errors::TransferError;
use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// What to do after a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Try the same endpoint again after the retry delay.
    RetrySameEndpoint,
    /// Move to the next endpoint in the list.
    RotateEndpoint,
}

/// Retry behaviour of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPolicy {
    /// Consecutive failures on one endpoint before rotating away from it.
    pub max_consecutive_failures: u32,
    /// Pause after a failure before the next attempt.
    pub retry_delay: Duration,
    /// Upper bound for a single transfer.
    pub request_timeout: Duration,
}

impl RotationPolicy {
    pub const DOWNLOAD: RotationPolicy = RotationPolicy {
        max_consecutive_failures: 2,
        retry_delay: Duration::from_millis(100),
        request_timeout: Duration::from_secs(15),
    };

    pub const UPLOAD: RotationPolicy = RotationPolicy {
        max_consecutive_failures: 3,
        retry_delay: Duration::from_millis(50),
        request_timeout: Duration::from_secs(15),
    };

    /// Default classifier: retry the same endpoint until the consecutive
    /// failure limit is hit, then rotate. Client errors other than 408 and
    /// 429 would repeat on that endpoint, so they rotate at once.
    pub fn classify(
        &self,
        error: &TransferError,
        consecutive_failures: u32,
    ) -> FailureAction {
        let rejected = match error {
            TransferError::Http(status) => {
                (400..500).contains(status) && !matches!(*status, 408 | 429)
            }
            _ => false,
        };

        if rejected || consecutive_failures >= self.max_consecutive_failures {
            FailureAction::RotateEndpoint
        } else {
            FailureAction::RetrySameEndpoint
        }
    }
}

/// Round-robin cursor over an endpoint list with failure bookkeeping.
#[derive(Debug, Clone)]
pub struct EndpointRotation {
    count: usize,
    current: usize,
    consecutive_failures: u32,
    failures_since_success: u32,
}

impl EndpointRotation {
    pub fn new(count: usize, start: usize) -> Self {
        let current = if count == 0 { 0 } else { start % count };
        Self {
            count,
            current,
            consecutive_failures: 0,
            failures_since_success: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.failures_since_success = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.failures_since_success += 1;
    }

    pub fn rotate(&mut self) {
        if self.count > 0 {
            self.current = (self.current + 1) % self.count;
        }
        self.consecutive_failures = 0;
    }

    /// True once every endpoint has used up its retries without a single
    /// success in between.
    pub fn exhausted(&self, policy: &RotationPolicy) -> bool {
        let limit =
            policy.max_consecutive_failures.max(1) as usize * self.count;
        self.failures_since_success as usize >= limit
    }
}

/// Time and cancellation bounds shared by all connections of a phase.
#[derive(Debug, Clone)]
pub struct PhaseBudget {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl PhaseBudget {
    pub fn new(duration: Duration, cancel: CancellationToken) -> Self {
        Self { deadline: Instant::now() + duration, cancel }
    }

    pub fn is_over(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Sleep for `delay`, returning early at the deadline or on
    /// cancellation. Returns false if the budget is over afterwards.
    pub async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_over();
        }

        let until = (Instant::now() + delay).min(self.deadline);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep_until(until) => !self.is_over(),
        }
    }
}

/// Counters reported by one connection when its loop ends.
#[derive(Debug, Default)]
pub struct LoopStats {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub last_error: Option<TransferError>,
}

impl LoopStats {
    pub fn merge(&mut self, other: LoopStats) {
        self.attempts += other.attempts;
        self.successes += other.successes;
        self.failures += other.failures;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }
}

/// Issue transfers until the budget is over.
///
/// `transfer` receives the index of the endpoint to use. `classify` decides
/// how to react to a failure given the current consecutive failure count.
/// `on_success` consumes a transfer's output and returns how long to pause
/// before the next request.
///
/// An in-flight transfer is abandoned when the deadline passes or the run is
/// cancelled.
#[allow(clippy::too_many_arguments)]
pub async fn resilient_transfer_loop<T, F, Fut, C, S>(
    name: impl Display,
    endpoint_count: usize,
    start: usize,
    policy: &RotationPolicy,
    budget: &PhaseBudget,
    mut transfer: F,
    classify: C,
    mut on_success: S,
) -> LoopStats
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
    C: Fn(&TransferError, u32) -> FailureAction,
    S: FnMut(T) -> Duration,
{
    let mut stats = LoopStats::default();
    let mut rotation = EndpointRotation::new(endpoint_count, start);

    if endpoint_count == 0 {
        warn!("{}: no endpoints configured", name);
        return stats;
    }

    while !budget.is_over() {
        let index = rotation.current();
        stats.attempts += 1;

        let result = tokio::select! {
            biased;
            _ = budget.cancel.cancelled() => break,
            _ = sleep_until(budget.deadline) => break,
            result = timeout(policy.request_timeout, transfer(index)) => {
                result.unwrap_or(Err(TransferError::Timeout))
            }
        };

        match result {
            Ok(value) => {
                rotation.record_success();
                stats.successes += 1;

                let pause = on_success(value);
                if !budget.pause(pause).await {
                    break;
                }
            }
            Err(error) => {
                rotation.record_failure();
                stats.failures += 1;
                warn!(
                    "{}: attempt {} on endpoint {} failed: {}",
                    name, stats.attempts, index, error
                );

                let action = classify(&error, rotation.consecutive_failures());
                stats.last_error = Some(error);

                if rotation.exhausted(policy) {
                    warn!(
                        "{}: all {} endpoints failed, stopping connection",
                        name, endpoint_count
                    );
                    break;
                }

                match action {
                    FailureAction::RetrySameEndpoint => {}
                    FailureAction::RotateEndpoint => {
                        rotation.rotate();
                        debug!(
                            "{}: rotating to endpoint {}",
                            name,
                            rotation.current()
                        );
                    }
                }

                if !budget.pause(policy.retry_delay).await {
                    break;
                }
            }
        }
    }

    debug!(
        "{}: {} attempts, {} succeeded, {} failed",
        name, stats.attempts, stats.successes, stats.failures
    );

    stats
}
