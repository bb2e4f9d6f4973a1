//! Banded lookup of phase parameters from a calibration estimate.
//!
//! Faster links get shorter phases, more connections and larger chunks.
//! Each table is a list of `(exclusive upper bound in Mbps, value)` rows
//! followed by the value used at or above the last bound.

use std::time::Duration;

const MIB: u64 = 1_048_576;

const DOWNLOAD_DURATION_SECS: (&[(f64, u64)], u64) = (
    &[(1.0, 15), (10.0, 12), (50.0, 10), (100.0, 8), (500.0, 6)],
    5,
);

const DOWNLOAD_CHUNK_BYTES: (&[(f64, u64)], u64) = (
    &[
        (1.0, 2 * MIB),
        (10.0, 5 * MIB),
        (50.0, 10 * MIB),
        (200.0, 15 * MIB),
    ],
    25 * MIB,
);

const DOWNLOAD_MBPS_PER_CONNECTION: f64 = 50.0;
const DOWNLOAD_MIN_CONNECTIONS: usize = 4;
const DOWNLOAD_MAX_CONNECTIONS: usize = 6;

const UPLOAD_DURATION_SECS: (&[(f64, u64)], u64) =
    (&[(10.0, 15), (50.0, 12), (200.0, 10)], 8);

const UPLOAD_CONNECTIONS: (&[(f64, u64)], u64) =
    (&[(25.0, 4), (100.0, 6), (500.0, 8)], 10);

const UPLOAD_CHUNK_BYTES: (&[(f64, u64)], u64) = (
    &[
        (5.0, MIB),
        (25.0, 2 * MIB),
        (100.0, 5 * MIB),
        (500.0, 10 * MIB),
    ],
    20 * MIB,
);

fn lookup(table: (&[(f64, u64)], u64), speed_mbps: f64) -> u64 {
    let (bands, top) = table;
    bands
        .iter()
        .find(|(bound, _)| speed_mbps < *bound)
        .map(|(_, value)| *value)
        .unwrap_or(top)
}

/// Duration, connection count and chunk size of a throughput phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveParameters {
    pub test_duration: Duration,
    pub parallel_connections: usize,
    pub chunk_size_bytes: u64,
}

impl AdaptiveParameters {
    pub fn for_download(estimate_mbps: f64) -> Self {
        let speed = sanitize(estimate_mbps);
        let connections =
            (speed / DOWNLOAD_MBPS_PER_CONNECTION).ceil() as usize;

        Self {
            test_duration: Duration::from_secs(lookup(
                DOWNLOAD_DURATION_SECS,
                speed,
            )),
            parallel_connections: connections
                .clamp(DOWNLOAD_MIN_CONNECTIONS, DOWNLOAD_MAX_CONNECTIONS),
            chunk_size_bytes: lookup(DOWNLOAD_CHUNK_BYTES, speed),
        }
    }

    pub fn for_upload(estimate_mbps: f64) -> Self {
        let speed = sanitize(estimate_mbps);

        Self {
            test_duration: Duration::from_secs(lookup(
                UPLOAD_DURATION_SECS,
                speed,
            )),
            parallel_connections: lookup(UPLOAD_CONNECTIONS, speed) as usize,
            chunk_size_bytes: lookup(UPLOAD_CHUNK_BYTES, speed),
        }
    }
}

// NaN and negative estimates are treated as the slowest band.
fn sanitize(speed_mbps: f64) -> f64 {
    if speed_mbps.is_finite() {
        speed_mbps.max(0.0)
    } else if speed_mbps == f64::INFINITY {
        f64::MAX
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_download_bands() {
        let slow = AdaptiveParameters::for_download(0.5);
        assert_eq!(slow.test_duration, Duration::from_secs(15));
        assert_eq!(slow.parallel_connections, 4);
        assert_eq!(slow.chunk_size_bytes, 2 * MIB);

        let fast = AdaptiveParameters::for_download(900.0);
        assert_eq!(fast.test_duration, Duration::from_secs(5));
        assert_eq!(fast.parallel_connections, 6);
        assert_eq!(fast.chunk_size_bytes, 25 * MIB);

        let middle = AdaptiveParameters::for_download(260.0);
        assert_eq!(middle.test_duration, Duration::from_secs(6));
        assert_eq!(middle.parallel_connections, 6);
        assert_eq!(middle.chunk_size_bytes, 25 * MIB);
    }

    #[test]
    fn test_download_band_edges_are_exclusive() {
        assert_eq!(
            AdaptiveParameters::for_download(10.0).test_duration,
            Duration::from_secs(10)
        );
        assert_eq!(
            AdaptiveParameters::for_download(9.99).test_duration,
            Duration::from_secs(12)
        );
        assert_eq!(AdaptiveParameters::for_download(250.0).parallel_connections, 5);
    }

    #[test]
    fn test_upload_bands() {
        let slow = AdaptiveParameters::for_upload(3.0);
        assert_eq!(slow.test_duration, Duration::from_secs(15));
        assert_eq!(slow.parallel_connections, 4);
        assert_eq!(slow.chunk_size_bytes, MIB);

        let fast = AdaptiveParameters::for_upload(600.0);
        assert_eq!(fast.test_duration, Duration::from_secs(8));
        assert_eq!(fast.parallel_connections, 10);
        assert_eq!(fast.chunk_size_bytes, 20 * MIB);
    }

    #[test]
    fn test_three_mbps_calibration() {
        // A 3 Mbps estimate lands in the slow-link download bands.
        let params = AdaptiveParameters::for_download(3.0);
        assert_eq!(params.test_duration, Duration::from_secs(12));
        assert_eq!(params.parallel_connections, 4);
        assert_eq!(params.chunk_size_bytes, 5 * MIB);
    }

    #[test]
    fn test_non_finite_estimates() {
        assert_eq!(
            AdaptiveParameters::for_download(f64::NAN),
            AdaptiveParameters::for_download(0.0)
        );
        assert_eq!(
            AdaptiveParameters::for_upload(f64::INFINITY),
            AdaptiveParameters::for_upload(10_000.0)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn download_parameters_are_monotonic(
            a in 0.0f64..2000.0,
            b in 0.0f64..2000.0
        ) {
            let (slow, fast) = if a <= b { (a, b) } else { (b, a) };
            let slow = AdaptiveParameters::for_download(slow);
            let fast = AdaptiveParameters::for_download(fast);

            prop_assert!(fast.test_duration <= slow.test_duration);
            prop_assert!(fast.parallel_connections >= slow.parallel_connections);
            prop_assert!(fast.chunk_size_bytes >= slow.chunk_size_bytes);
            prop_assert!((4..=6).contains(&fast.parallel_connections));
        }

        #[test]
        fn upload_parameters_are_monotonic(
            a in 0.0f64..2000.0,
            b in 0.0f64..2000.0
        ) {
            let (slow, fast) = if a <= b { (a, b) } else { (b, a) };
            let slow = AdaptiveParameters::for_upload(slow);
            let fast = AdaptiveParameters::for_upload(fast);

            prop_assert!(fast.test_duration <= slow.test_duration);
            prop_assert!(fast.parallel_connections >= slow.parallel_connections);
            prop_assert!(fast.chunk_size_bytes >= slow.chunk_size_bytes);
        }
    }
}
