//! Quality scoring for common use cases.
//!
//! Each metric is mapped linearly onto 0-100 between a "worst" threshold
//! (score 0) and a "best" threshold (score 100). A use case combines the
//! metrics it cares about with fixed weights, and the combined score picks
//! the label.

use serde::Serialize;

/// Quality labels, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum QualityLabel {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLabel {
    /// Label for a 0-100 score.
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            QualityLabel::Excellent
        } else if score >= 65.0 {
            QualityLabel::Good
        } else if score >= 40.0 {
            QualityLabel::Fair
        } else {
            QualityLabel::Poor
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            QualityLabel::Excellent => "Excellent",
            QualityLabel::Good => "Good",
            QualityLabel::Fair => "Fair",
            QualityLabel::Poor => "Poor",
        }
    }
}

/// Score and label for one use case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UseCaseScore {
    /// 0-100, rounded to a whole number.
    pub score: u8,
    pub label: QualityLabel,
}

impl UseCaseScore {
    fn from_score(score: f64) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            score: score.round() as u8,
            label: QualityLabel::from_score(score),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UseCaseScores {
    pub browsing: UseCaseScore,
    pub gaming: UseCaseScore,
    pub streaming: UseCaseScore,
}

impl UseCaseScores {
    /// The weakest of the three labels.
    pub fn overall(&self) -> QualityLabel {
        self.browsing.label.min(self.gaming.label).min(self.streaming.label)
    }
}

/// Inputs of the scoring functions. Speeds in Mbps, times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionMetrics {
    pub download_mbps: f64,
    /// `None` when the upload phase was skipped.
    pub upload_mbps: Option<f64>,
    /// `None` when no latency probe was usable.
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl ConnectionMetrics {
    pub fn new(
        download_mbps: f64,
        upload_mbps: Option<f64>,
        ping_ms: Option<f64>,
        jitter_ms: Option<f64>,
    ) -> Self {
        Self { download_mbps, upload_mbps, ping_ms, jitter_ms }
    }
}

/// `(worst, best)` pairs per metric and use case.
mod browsing_thresholds {
    pub const DOWNLOAD: (f64, f64) = (1.0, 25.0);
    pub const PING: (f64, f64) = (200.0, 30.0);

    pub const DOWNLOAD_WEIGHT: f64 = 0.6;
    pub const PING_WEIGHT: f64 = 0.4;
}

mod gaming_thresholds {
    pub const PING: (f64, f64) = (150.0, 20.0);
    pub const JITTER: (f64, f64) = (50.0, 5.0);
    pub const DOWNLOAD: (f64, f64) = (3.0, 25.0);
    pub const UPLOAD: (f64, f64) = (1.0, 10.0);

    pub const PING_WEIGHT: f64 = 0.5;
    pub const JITTER_WEIGHT: f64 = 0.3;
    pub const DOWNLOAD_WEIGHT: f64 = 0.1;
    pub const UPLOAD_WEIGHT: f64 = 0.1;
}

mod streaming_thresholds {
    pub const DOWNLOAD: (f64, f64) = (3.0, 50.0);
    pub const JITTER: (f64, f64) = (100.0, 10.0);
    pub const PING: (f64, f64) = (300.0, 50.0);

    pub const DOWNLOAD_WEIGHT: f64 = 0.7;
    pub const JITTER_WEIGHT: f64 = 0.15;
    pub const PING_WEIGHT: f64 = 0.15;
}

/// Map `value` onto 0-100 between `worst` and `best`. Works for metrics
/// where lower is better (`best < worst`) as well as higher is better.
pub fn linear_score(value: f64, (worst, best): (f64, f64)) -> f64 {
    if !value.is_finite() || worst == best {
        return 0.0;
    }

    ((value - worst) / (best - worst)).clamp(0.0, 1.0) * 100.0
}

fn combine(parts: &[(Option<f64>, f64)]) -> f64 {
    let (sum, weight) = parts
        .iter()
        .filter_map(|(score, weight)| score.map(|s| (s, *weight)))
        .fold((0.0, 0.0), |(sum, total), (score, weight)| {
            (sum + score * weight, total + weight)
        });

    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

pub fn browsing_score(metrics: &ConnectionMetrics) -> UseCaseScore {
    use browsing_thresholds::*;

    UseCaseScore::from_score(combine(&[
        (
            Some(linear_score(metrics.download_mbps, DOWNLOAD)),
            DOWNLOAD_WEIGHT,
        ),
        (metrics.ping_ms.map(|ping| linear_score(ping, PING)), PING_WEIGHT),
    ]))
}

pub fn gaming_score(metrics: &ConnectionMetrics) -> UseCaseScore {
    use gaming_thresholds::*;

    UseCaseScore::from_score(combine(&[
        (metrics.ping_ms.map(|ping| linear_score(ping, PING)), PING_WEIGHT),
        (
            metrics.jitter_ms.map(|jitter| linear_score(jitter, JITTER)),
            JITTER_WEIGHT,
        ),
        (
            Some(linear_score(metrics.download_mbps, DOWNLOAD)),
            DOWNLOAD_WEIGHT,
        ),
        (
            metrics.upload_mbps.map(|upload| linear_score(upload, UPLOAD)),
            UPLOAD_WEIGHT,
        ),
    ]))
}

pub fn streaming_score(metrics: &ConnectionMetrics) -> UseCaseScore {
    use streaming_thresholds::*;

    UseCaseScore::from_score(combine(&[
        (
            Some(linear_score(metrics.download_mbps, DOWNLOAD)),
            DOWNLOAD_WEIGHT,
        ),
        (
            metrics.jitter_ms.map(|jitter| linear_score(jitter, JITTER)),
            JITTER_WEIGHT,
        ),
        (metrics.ping_ms.map(|ping| linear_score(ping, PING)), PING_WEIGHT),
    ]))
}

pub fn calculate_scores(metrics: &ConnectionMetrics) -> UseCaseScores {
    UseCaseScores {
        browsing: browsing_score(metrics),
        gaming: gaming_score(metrics),
        streaming: streaming_score(metrics),
    }
}

/// Label for a single direction's throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SpeedQuality {
    NoConnection,
    VeryPoor,
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl SpeedQuality {
    pub fn from_mbps(speed_mbps: f64) -> Self {
        if speed_mbps >= 100.0 {
            SpeedQuality::Excellent
        } else if speed_mbps >= 50.0 {
            SpeedQuality::VeryGood
        } else if speed_mbps >= 25.0 {
            SpeedQuality::Good
        } else if speed_mbps >= 10.0 {
            SpeedQuality::Fair
        } else if speed_mbps >= 5.0 {
            SpeedQuality::Poor
        } else if speed_mbps > 0.0 {
            SpeedQuality::VeryPoor
        } else {
            SpeedQuality::NoConnection
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SpeedQuality::Excellent => "Excellent",
            SpeedQuality::VeryGood => "Very Good",
            SpeedQuality::Good => "Good",
            SpeedQuality::Fair => "Fair",
            SpeedQuality::Poor => "Poor",
            SpeedQuality::VeryPoor => "Very Poor",
            SpeedQuality::NoConnection => "No Connection",
        }
    }
}

/// Megabits per second to megabytes per second, as shown next to Mbps.
pub fn megabytes_per_second(speed_mbps: f64) -> f64 {
    speed_mbps / 8.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_score_directions() {
        // higher is better
        assert_eq!(linear_score(1.0, (1.0, 25.0)), 0.0);
        assert_eq!(linear_score(25.0, (1.0, 25.0)), 100.0);
        assert_eq!(linear_score(13.0, (1.0, 25.0)), 50.0);
        assert_eq!(linear_score(500.0, (1.0, 25.0)), 100.0);

        // lower is better
        assert_eq!(linear_score(30.0, (200.0, 30.0)), 100.0);
        assert_eq!(linear_score(200.0, (200.0, 30.0)), 0.0);
        assert_eq!(linear_score(115.0, (200.0, 30.0)), 50.0);
    }

    #[test]
    fn test_linear_score_degenerate_inputs() {
        assert_eq!(linear_score(f64::NAN, (1.0, 25.0)), 0.0);
        assert_eq!(linear_score(10.0, (5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_fast_link_is_excellent() {
        let metrics =
            ConnectionMetrics::new(300.0, Some(100.0), Some(10.0), Some(1.0));
        let scores = calculate_scores(&metrics);

        assert_eq!(scores.browsing.score, 100);
        assert_eq!(scores.gaming.label, QualityLabel::Excellent);
        assert_eq!(scores.streaming.label, QualityLabel::Excellent);
        assert_eq!(scores.overall(), QualityLabel::Excellent);
    }

    #[test]
    fn test_slow_latency_hurts_gaming() {
        let metrics =
            ConnectionMetrics::new(300.0, Some(100.0), Some(150.0), Some(50.0));
        let scores = calculate_scores(&metrics);

        // only the download and upload parts score
        assert_eq!(scores.gaming.score, 20);
        assert_eq!(scores.gaming.label, QualityLabel::Poor);
        assert_eq!(scores.browsing.score, 72);
    }

    #[test]
    fn test_unavailable_latency_is_left_out() {
        let metrics = ConnectionMetrics::new(14.0, Some(5.5), None, None);
        let scores = calculate_scores(&metrics);

        assert_eq!(scores.browsing.score, 54);
        assert_eq!(scores.gaming.score, 50);
        assert_eq!(scores.gaming.label, QualityLabel::Fair);
        assert_eq!(scores.streaming.score, 23);
    }

    #[test]
    fn test_missing_upload_is_ignored() {
        let with_upload =
            ConnectionMetrics::new(25.0, Some(10.0), Some(20.0), Some(5.0));
        let without_upload =
            ConnectionMetrics::new(25.0, None, Some(20.0), Some(5.0));

        assert_eq!(gaming_score(&with_upload).score, 100);
        assert_eq!(gaming_score(&without_upload).score, 100);
    }

    #[test]
    fn test_speed_quality_table() {
        assert_eq!(SpeedQuality::from_mbps(150.0), SpeedQuality::Excellent);
        assert_eq!(SpeedQuality::from_mbps(100.0), SpeedQuality::Excellent);
        assert_eq!(SpeedQuality::from_mbps(50.0), SpeedQuality::VeryGood);
        assert_eq!(SpeedQuality::from_mbps(30.0), SpeedQuality::Good);
        assert_eq!(SpeedQuality::from_mbps(10.0), SpeedQuality::Fair);
        assert_eq!(SpeedQuality::from_mbps(5.0), SpeedQuality::Poor);
        assert_eq!(SpeedQuality::from_mbps(0.5), SpeedQuality::VeryPoor);
        assert_eq!(SpeedQuality::from_mbps(0.0), SpeedQuality::NoConnection);
        assert_eq!(SpeedQuality::VeryGood.description(), "Very Good");
    }

    #[test]
    fn test_megabytes_per_second() {
        assert_eq!(megabytes_per_second(80.0), 10.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn scores_are_bounded(
            download in 0.0f64..2000.0,
            upload in proptest::option::of(0.0f64..2000.0),
            ping in proptest::option::of(0.0f64..2000.0),
            jitter in proptest::option::of(0.0f64..500.0)
        ) {
            let metrics = ConnectionMetrics::new(download, upload, ping, jitter);
            let scores = calculate_scores(&metrics);
            for score in [scores.browsing, scores.gaming, scores.streaming] {
                prop_assert!(score.score <= 100);
            }
            prop_assert!(scores.overall() <= scores.browsing.label);
            prop_assert!(scores.overall() <= scores.gaming.label);
        }

        #[test]
        fn faster_download_never_scores_lower(
            download in 0.0f64..500.0,
            bump in 0.0f64..500.0,
            ping in 0.0f64..400.0,
            jitter in 0.0f64..100.0
        ) {
            let (ping, jitter) = (Some(ping), Some(jitter));
            let slow = ConnectionMetrics::new(download, None, ping, jitter);
            let fast = ConnectionMetrics { download_mbps: download + bump, ..slow };
            let (slow, fast) = (calculate_scores(&slow), calculate_scores(&fast));

            prop_assert!(fast.browsing.score >= slow.browsing.score);
            prop_assert!(fast.gaming.score >= slow.gaming.score);
            prop_assert!(fast.streaming.score >= slow.streaming.score);
        }

        #[test]
        fn higher_ping_never_scores_higher(
            ping in 0.0f64..500.0,
            bump in 0.0f64..500.0
        ) {
            let low =
                ConnectionMetrics::new(50.0, Some(10.0), Some(ping), Some(5.0));
            let high = ConnectionMetrics { ping_ms: Some(ping + bump), ..low };
            let (low, high) = (calculate_scores(&low), calculate_scores(&high));

            prop_assert!(high.gaming.score <= low.gaming.score);
            prop_assert!(high.browsing.label <= low.browsing.label);
        }
    }
}
