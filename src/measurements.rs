use crate::stats::{mean, trim_sorted};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bits per megabit as used throughout the engine (binary megabits).
pub const BITS_PER_MEGABIT: f64 = 1_048_576.0;

/// Fraction dropped from each end of the sorted probe set.
pub const QUARTILE: f64 = 0.25;

/// Convert a byte count transferred over `seconds` into megabits per second.
///
/// Returns 0.0 for a zero, negative or non-finite duration so callers never
/// divide by zero.
pub fn calculate_speed(bytes: u64, seconds: f64) -> f64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0.0;
    }

    (bytes as f64 * 8.0) / (seconds * BITS_PER_MEGABIT)
}

/// Inverse of [`calculate_speed`]: bytes moved at `mbps` over `seconds`.
pub fn bytes_from_mbps(mbps: f64, seconds: f64) -> f64 {
    mbps * seconds * BITS_PER_MEGABIT / 8.0
}

/// Interquartile mean of latency probes in milliseconds.
pub fn interquartile_mean(probes: &[f64]) -> Option<f64> {
    mean(&trim_sorted(probes, QUARTILE))
}

/// Mean absolute difference between consecutive probes, in probe order.
pub fn jitter(probes: &[f64]) -> f64 {
    if probes.len() < 2 {
        return 0.0;
    }

    let total: f64 =
        probes.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();

    total / (probes.len() - 1) as f64
}

/// A single measurement unit recorded during a transfer phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub bytes_transferred: u64,
    pub elapsed_ms: f64,
    /// Offset of the end of the transfer from the start of the phase.
    pub timestamp_offset_ms: f64,
    pub connection_id: usize,
}

impl Sample {
    pub fn new(
        bytes_transferred: u64,
        elapsed_ms: f64,
        timestamp_offset_ms: f64,
        connection_id: usize,
    ) -> Self {
        Self {
            bytes_transferred,
            elapsed_ms,
            timestamp_offset_ms,
            connection_id,
        }
    }

    /// Throughput of this sample alone.
    pub fn speed_mbps(&self) -> f64 {
        calculate_speed(self.bytes_transferred, self.elapsed_ms / 1000.0)
    }
}

/// Running byte total shared by every transfer task of a phase.
///
/// All updates go through a single atomic add, so interleaved tasks never
/// lose an increment.
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    total: AtomicU64,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `bytes` and return the new running total.
    pub fn add(&self, bytes: u64) -> u64 {
        self.total.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }
}

/// An instantaneous speed reading taken by the phase sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub elapsed_secs: f64,
    pub speed_mbps: f64,
}

/// Bounded ring of speed samples; the oldest reading is dropped once the
/// capacity is reached.
#[derive(Debug, Clone)]
pub struct SpeedSampleRing {
    samples: VecDeque<SpeedSample>,
    capacity: usize,
}

impl SpeedSampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: SpeedSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<SpeedSample> {
        self.samples.iter().copied().collect()
    }

    pub fn speeds(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.speed_mbps).collect()
    }

    /// Mean of the chronologically later half of the ring, or `None` when
    /// fewer than `min_samples` readings were taken.
    pub fn steady_state_mean(&self, min_samples: usize) -> Option<f64> {
        if self.samples.len() < min_samples.max(1) {
            return None;
        }

        let later: Vec<f64> = self
            .samples
            .iter()
            .skip(self.samples.len() / 2)
            .map(|s| s.speed_mbps)
            .collect();

        mean(&later)
    }
}
