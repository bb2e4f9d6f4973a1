//! Blending of several throughput estimates into one reported speed.
//!
//! Each estimate captures a different bias: the overall average includes
//! ramp-up, the steady-state value ignores it, and the peak-oriented values
//! approximate link capacity. The final value is a weighted mean of the
//! estimates that exist, so it always lies between the smallest and the
//! largest of them.

/// Weights of the reconciliation blends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileWeights {
    pub download_overall: f64,
    pub download_steady_state: f64,
    pub upload_overall: f64,
    pub upload_median: f64,
    pub upload_steady_state: f64,
    pub upload_peak: f64,
}

impl Default for ReconcileWeights {
    fn default() -> Self {
        Self {
            download_overall: 0.6,
            download_steady_state: 0.4,
            upload_overall: 0.15,
            upload_median: 0.15,
            upload_steady_state: 0.40,
            upload_peak: 0.30,
        }
    }
}

/// Per-method upload estimates in Mbps; `None` when a method had no data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UploadSignals {
    /// Total bytes over total phase time.
    pub overall: Option<f64>,
    /// Median per-request speed times the number of connections that
    /// completed a request.
    pub median_scaled: Option<f64>,
    /// Bytes over span of the later requests.
    pub steady_state: Option<f64>,
    /// 90th percentile of the aggregate speeds seen by the sampler.
    pub peak: Option<f64>,
}

fn usable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Weighted mean over the usable `(value, weight)` pairs, renormalising the
/// weights of the pairs that remain.
pub fn weighted_blend(pairs: &[(Option<f64>, f64)]) -> Option<f64> {
    let (sum, weight) = pairs
        .iter()
        .filter_map(|(value, weight)| value.map(|v| (v, *weight)))
        .filter(|(value, weight)| usable(*value) && usable(*weight))
        .fold((0.0, 0.0), |(sum, total), (value, weight)| {
            (sum + value * weight, total + weight)
        });

    if weight > 0.0 {
        Some(sum / weight).filter(|v| usable(*v))
    } else {
        None
    }
}

impl ReconcileWeights {
    /// Blend the overall average with the steady-state mean. A missing
    /// steady-state value is replaced by the overall average.
    pub fn download(
        &self,
        overall: f64,
        steady_state: Option<f64>,
    ) -> Option<f64> {
        let steady_state =
            steady_state.filter(|v| usable(*v)).unwrap_or(overall);

        weighted_blend(&[
            (Some(overall), self.download_overall),
            (Some(steady_state), self.download_steady_state),
        ])
    }

    pub fn upload(&self, signals: &UploadSignals) -> Option<f64> {
        weighted_blend(&[
            (signals.overall, self.upload_overall),
            (signals.median_scaled, self.upload_median),
            (signals.steady_state, self.upload_steady_state),
            (signals.peak, self.upload_peak),
        ])
    }
}

/// Value reported when reconciliation produced nothing usable.
pub fn fallback_speed(
    calibration_mbps: f64,
    factor: f64,
    floor_mbps: f64,
) -> f64 {
    let scaled = calibration_mbps * factor;
    if scaled.is_finite() {
        scaled.max(floor_mbps)
    } else {
        floor_mbps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_download_blend() {
        let weights = ReconcileWeights::default();
        let value = weights.download(100.0, Some(200.0)).unwrap();
        assert!((value - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_download_without_steady_state() {
        let weights = ReconcileWeights::default();
        assert_eq!(weights.download(80.0, None), Some(80.0));
        assert_eq!(weights.download(80.0, Some(f64::NAN)), Some(80.0));
    }

    #[test]
    fn test_download_unusable_overall() {
        let weights = ReconcileWeights::default();
        assert_eq!(weights.download(0.0, None), None);
        assert_eq!(weights.download(f64::INFINITY, None), None);
    }

    #[test]
    fn test_upload_renormalises_missing_signals() {
        let weights = ReconcileWeights::default();
        let signals = UploadSignals {
            overall: Some(10.0),
            median_scaled: None,
            steady_state: Some(20.0),
            peak: None,
        };

        // (10 * 0.15 + 20 * 0.40) / 0.55
        let expected = (1.5 + 8.0) / 0.55;
        let value = weights.upload(&signals).unwrap();
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_upload_without_signals() {
        let weights = ReconcileWeights::default();
        assert_eq!(weights.upload(&UploadSignals::default()), None);
    }

    #[test]
    fn test_fallback_speed() {
        assert_eq!(fallback_speed(50.0, 0.8, 5.0), 40.0);
        assert_eq!(fallback_speed(2.0, 0.8, 5.0), 5.0);
        assert_eq!(fallback_speed(f64::NAN, 0.8, 1.0), 1.0);
    }

    fn signal() -> impl Strategy<Value = Option<f64>> {
        proptest::option::of(0.1f64..5000.0)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn upload_blend_is_bounded_by_its_inputs(
            overall in signal(),
            median_scaled in signal(),
            steady_state in signal(),
            peak in signal()
        ) {
            let signals = UploadSignals { overall, median_scaled, steady_state, peak };
            let present: Vec<f64> =
                [overall, median_scaled, steady_state, peak].into_iter().flatten().collect();

            match ReconcileWeights::default().upload(&signals) {
                Some(value) => {
                    let min = present.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = present.iter().cloned().fold(0.0, f64::max);
                    prop_assert!(value >= min - 1e-9 && value <= max + 1e-9);
                }
                None => prop_assert!(present.is_empty()),
            }
        }

        #[test]
        fn download_blend_is_monotonic(
            overall in 0.1f64..5000.0,
            steady_state in 0.1f64..5000.0,
            bump in 0.0f64..1000.0
        ) {
            let weights = ReconcileWeights::default();
            let base = weights.download(overall, Some(steady_state)).unwrap();
            let faster = weights.download(overall + bump, Some(steady_state)).unwrap();
            prop_assert!(faster >= base - 1e-9);

            let faster = weights.download(overall, Some(steady_state + bump)).unwrap();
            prop_assert!(faster >= base - 1e-9);
        }
    }
}
