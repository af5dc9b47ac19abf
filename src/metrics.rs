//! Biometric delta analysis
//!
//! Compares each metric's current value with a trailing baseline (the mean of
//! prior days, excluding today) and turns the result into a 0-100 score card.
//!
//! # Polarity
//!
//! - Resting heart rate: lower is better
//! - HRV, sleep duration, sleep quality: higher is better
//!
//! Deltas inside a per-metric stability band are reported as "stable" so the
//! card never makes a strong claim about noise.
//!
//! # HRV
//!
//! Absolute HRV is individual, so the HRV score is relative to the athlete's
//! own baseline: at or above baseline lands in [70, 100], below baseline in
//! [30, 70) with a floor of 30.

use crate::models::{DeltaTrend, MetricKind, MetricScore, MetricSeries, Polarity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Target nightly sleep used to scale the sleep duration score
pub const SLEEP_TARGET_HOURS: f64 = 8.0;

/// Deltas within these bands are reported as stable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityThresholds {
    /// Resting heart rate band in bpm
    pub heart_rate_bpm: f64,
    /// HRV band in milliseconds
    pub hrv_ms: f64,
    /// Sleep duration band in hours
    pub sleep_duration_hours: f64,
    /// Sleep quality band in points
    pub sleep_quality_points: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        StabilityThresholds {
            heart_rate_bpm: 2.0,
            hrv_ms: 5.0,
            sleep_duration_hours: 0.3,
            sleep_quality_points: 5.0,
        }
    }
}

impl StabilityThresholds {
    pub fn for_kind(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::HeartRate => self.heart_rate_bpm,
            MetricKind::Hrv => self.hrv_ms,
            MetricKind::SleepDuration => self.sleep_duration_hours,
            MetricKind::SleepQuality => self.sleep_quality_points,
        }
    }
}

/// Baseline comparison for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub current: f64,
    pub baseline: f64,
    pub delta: f64,
    pub is_favorable: bool,
    pub trend: DeltaTrend,
}

/// Scores individual biometric metrics against their trailing baseline
#[derive(Debug, Clone, Default)]
pub struct MetricDeltaAnalyzer {
    thresholds: StabilityThresholds,
}

impl MetricDeltaAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: StabilityThresholds) -> Self {
        MetricDeltaAnalyzer { thresholds }
    }

    /// Compare the current value with the series baseline.
    ///
    /// When `current_value` is absent the most recent sample stands in for
    /// it and is left out of the baseline. Returns `None` when there is neither a current value nor any
    /// sample: callers must omit the metric rather than invent a score.
    pub fn delta(
        &self,
        series: &MetricSeries,
        current_value: Option<f64>,
        today: NaiveDate,
    ) -> Option<MetricDelta> {
        let (current, current_date) = match current_value.filter(|v| v.is_finite()) {
            Some(value) => (value, today),
            None => series.latest().map(|s| (s.value, s.date))?,
        };

        // The sample standing in for the current value never counts toward its own baseline
        let prior: Vec<f64> = series
            .samples()
            .iter()
            .filter(|s| s.date != today && s.date != current_date)
            .map(|s| s.value)
            .collect();

        // No history yet: neutral, not penalized
        let baseline = if prior.is_empty() {
            current
        } else {
            prior.iter().mean()
        };
        let delta = current - baseline;

        let kind = series.kind();
        let is_favorable = match kind.polarity() {
            Polarity::LowerIsBetter => delta < 0.0,
            Polarity::HigherIsBetter => delta > 0.0,
        };
        let trend = if delta.abs() <= self.thresholds.for_kind(kind) {
            DeltaTrend::Stable
        } else if is_favorable {
            DeltaTrend::Favorable
        } else {
            DeltaTrend::Unfavorable
        };

        Some(MetricDelta {
            current,
            baseline,
            delta,
            is_favorable,
            trend,
        })
    }

    /// Build the full score card for a metric, or `None` when there is no data
    pub fn score(
        &self,
        series: &MetricSeries,
        current_value: Option<f64>,
        today: NaiveDate,
    ) -> Option<MetricScore> {
        let delta = self.delta(series, current_value, today)?;
        let kind = series.kind();

        let score = match kind {
            MetricKind::HeartRate => clamp_score(delta.current),
            MetricKind::Hrv => hrv_score(delta.current, delta.baseline),
            MetricKind::SleepDuration => {
                clamp_score(delta.current / SLEEP_TARGET_HOURS * 100.0)
            }
            MetricKind::SleepQuality => clamp_score(delta.current),
        };

        Some(MetricScore {
            kind,
            score,
            title: kind.title().to_string(),
            description: describe(kind, &delta),
            series: series.clone(),
            current_value: delta.current,
            baseline: delta.baseline,
            delta_from_baseline: delta.delta,
            is_favorable: delta.is_favorable,
            trend: delta.trend,
        })
    }
}

/// Relative HRV score.
///
/// At or above baseline: 70 plus one point per percent above, capped at 100.
/// Below baseline: 70 minus 0.8 points per percent short, floored at 30.
pub fn hrv_score(current: f64, baseline: f64) -> u8 {
    if baseline <= 0.0 || !baseline.is_finite() || !current.is_finite() {
        return 70;
    }

    let ratio = (current / baseline).max(0.0);
    let score = if ratio >= 1.0 {
        70.0 + ((ratio - 1.0) * 100.0).min(30.0)
    } else {
        let shortfall = 1.0 - ratio;
        // Any shortfall stays strictly below the at-baseline score
        (70.0 - shortfall * 80.0).max(30.0).round().min(69.0)
    };

    score.round().clamp(30.0, 100.0) as u8
}

fn clamp_score(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn describe(kind: MetricKind, delta: &MetricDelta) -> String {
    let unit = kind.unit();
    let precision = match kind {
        MetricKind::SleepDuration => 1,
        _ => 0,
    };

    match delta.trend {
        DeltaTrend::Stable => format!(
            "{:.*} {}, stable compared to your baseline of {:.*} {}",
            precision, delta.current, unit, precision, delta.baseline, unit
        ),
        DeltaTrend::Favorable | DeltaTrend::Unfavorable => {
            let direction = if delta.delta < 0.0 { "below" } else { "above" };
            format!(
                "{:.*} {}, {:.*} {} {} your baseline",
                precision,
                delta.current,
                unit,
                precision,
                delta.delta.abs(),
                unit,
                direction
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
    }

    fn series(kind: MetricKind, values: &[(u32, f64)]) -> MetricSeries {
        MetricSeries::from_points(kind, values.iter().map(|&(d, v)| (day(d), v)))
    }

    #[test]
    fn test_heart_rate_drop_is_favorable() {
        let analyzer = MetricDeltaAnalyzer::new();
        let hr = series(MetricKind::HeartRate, &[(1, 64.0), (2, 66.0), (3, 65.0)]);

        let delta = analyzer.delta(&hr, Some(58.0), day(4)).unwrap();

        assert_eq!(delta.baseline, 65.0);
        assert_eq!(delta.delta, -7.0);
        assert!(delta.is_favorable);
        assert_eq!(delta.trend, DeltaTrend::Favorable);
    }

    #[test]
    fn test_baseline_excludes_today() {
        let analyzer = MetricDeltaAnalyzer::new();
        let hrv = series(MetricKind::Hrv, &[(1, 40.0), (2, 60.0), (4, 90.0)]);

        let delta = analyzer.delta(&hrv, None, day(4)).unwrap();

        assert_eq!(delta.current, 90.0);
        assert_eq!(delta.baseline, 50.0);
    }

    #[test]
    fn test_no_history_is_neutral() {
        let analyzer = MetricDeltaAnalyzer::new();
        let empty = MetricSeries::empty(MetricKind::SleepQuality);

        let delta = analyzer.delta(&empty, Some(72.0), day(4)).unwrap();
        assert_eq!(delta.baseline, 72.0);
        assert_eq!(delta.delta, 0.0);
        assert_eq!(delta.trend, DeltaTrend::Stable);
    }

    #[test]
    fn test_no_data_returns_none() {
        let analyzer = MetricDeltaAnalyzer::new();
        let empty = MetricSeries::empty(MetricKind::Hrv);

        assert!(analyzer.delta(&empty, None, day(4)).is_none());
        assert!(analyzer.score(&empty, None, day(4)).is_none());
        assert!(analyzer.score(&empty, Some(f64::NAN), day(4)).is_none());
    }

    #[test]
    fn test_stable_band_description() {
        let analyzer = MetricDeltaAnalyzer::new();
        let hr = series(MetricKind::HeartRate, &[(1, 60.0), (2, 60.0)]);

        let card = analyzer.score(&hr, Some(61.5), day(3)).unwrap();

        assert_eq!(card.trend, DeltaTrend::Stable);
        assert!(!card.is_favorable);
        assert!(card.description.contains("stable"));
        assert_eq!(card.score, 62);
    }

    #[test]
    fn test_sleep_scores() {
        let analyzer = MetricDeltaAnalyzer::new();
        let sleep = series(MetricKind::SleepDuration, &[(1, 7.0), (2, 7.4)]);
        let card = analyzer.score(&sleep, Some(6.0), day(3)).unwrap();
        assert_eq!(card.score, 75);
        assert_eq!(card.trend, DeltaTrend::Unfavorable);
        assert!(card.description.contains("below"));

        let long = analyzer.score(&sleep, Some(10.0), day(3)).unwrap();
        assert_eq!(long.score, 100);

        let quality = series(MetricKind::SleepQuality, &[(1, 80.0)]);
        let card = analyzer.score(&quality, Some(140.0), day(3)).unwrap();
        assert_eq!(card.score, 100);
    }

    #[test]
    fn test_hrv_score_bands() {
        assert_eq!(hrv_score(50.0, 50.0), 70);
        assert_eq!(hrv_score(60.0, 50.0), 90);
        assert_eq!(hrv_score(100.0, 50.0), 100);
        assert_eq!(hrv_score(45.0, 50.0), 62);
        assert_eq!(hrv_score(10.0, 50.0), 30);
        assert_eq!(hrv_score(0.0, 50.0), 30);
        assert_eq!(hrv_score(40.0, 0.0), 70);
        assert_eq!(hrv_score(49.9, 50.0), 69);
        assert_eq!(hrv_score(49.999, 50.0), 69);
    }

    #[test]
    fn test_stale_latest_sample_is_not_its_own_baseline() {
        let analyzer = MetricDeltaAnalyzer::new();
        let hrv = series(MetricKind::Hrv, &[(1, 40.0), (2, 60.0), (3, 80.0)]);

        let delta = analyzer.delta(&hrv, None, day(5)).unwrap();

        assert_eq!(delta.current, 80.0);
        assert_eq!(delta.baseline, 50.0);
        assert_eq!(delta.delta, 30.0);
    }

    #[test]
    fn test_hrv_card_uses_relative_score() {
        let analyzer = MetricDeltaAnalyzer::new();
        let hrv = series(MetricKind::Hrv, &[(1, 100.0), (2, 100.0)]);

        let card = analyzer.score(&hrv, Some(80.0), day(3)).unwrap();
        assert_eq!(card.score, 54);
        assert!(!card.is_favorable);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_hrv_score_monotonic_and_clamped(
            baseline in 10.0f64..150.0,
            ratio_a in 0.0f64..3.0,
            ratio_b in 0.0f64..3.0,
        ) {
            let (low, high) = if ratio_a <= ratio_b { (ratio_a, ratio_b) } else { (ratio_b, ratio_a) };
            let score_low = hrv_score(baseline * low, baseline);
            let score_high = hrv_score(baseline * high, baseline);

            prop_assert!(score_low <= score_high);
            prop_assert!((30..=100).contains(&score_low));
            prop_assert!((30..=100).contains(&score_high));
        }

        #[test]
        fn test_hrv_below_baseline_scores_under_70(
            baseline in 10.0f64..150.0,
            ratio in 0.0f64..0.9999,
        ) {
            let score = hrv_score(baseline * ratio, baseline);
            prop_assert!((30..70).contains(&score));
        }

        #[test]
        fn test_stable_deltas_never_claim_direction(
            baseline in 40.0f64..80.0,
            offset in -1.9f64..1.9,
        ) {
            let analyzer = MetricDeltaAnalyzer::new();
            let hr = MetricSeries::from_points(
                MetricKind::HeartRate,
                vec![(day(1), baseline), (day(2), baseline)],
            );
            let card = analyzer.score(&hr, Some(baseline + offset), day(3)).unwrap();
            prop_assert_eq!(card.trend, DeltaTrend::Stable);
            prop_assert!(card.description.contains("stable"));
        }
    }
}
