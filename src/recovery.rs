//! Recovery score aggregation
//!
//! Combines the per-metric score cards into one readiness score and then
//! attenuates it by the post-activity cooldown adjustment.
//!
//! # Weights
//!
//! | Metric | Weight | Contribution |
//! |---|---|---|
//! | Resting heart rate | 3 | `max(40, 100 - raw)` (lower heart rate is better) |
//! | HRV | 3 | raw score |
//! | Sleep duration | 2 | raw score |
//! | Sleep quality | 1 | raw score |
//!
//! Missing metrics are left out of both the weighted sum and the total
//! weight, so the remaining metrics share the full scale.

use crate::cooldown::RESTING_ADJUSTMENT;
use crate::models::{DataCompleteness, DeltaTrend, MetricKind, MetricScore, RecoveryScore};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::debug;

/// Floor applied to the inverted heart rate contribution
pub const HEART_RATE_INVERSION_FLOOR: u32 = 40;

pub fn metric_weight(kind: MetricKind) -> u32 {
    match kind {
        MetricKind::HeartRate => 3,
        MetricKind::Hrv => 3,
        MetricKind::SleepDuration => 2,
        MetricKind::SleepQuality => 1,
    }
}

/// Value a metric contributes to the weighted sum
pub fn contribution(score: &MetricScore) -> u32 {
    let raw = u32::from(score.score.min(100));
    match score.kind {
        MetricKind::HeartRate => (100 - raw).max(HEART_RATE_INVERSION_FLOOR),
        MetricKind::Hrv | MetricKind::SleepDuration | MetricKind::SleepQuality => raw,
    }
}

/// Readiness interpretation of a final score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Primed,   // 80 and above
    Ready,    // 60 to 79
    Moderate, // 40 to 59
    Strained, // below 40
}

impl RecoveryStatus {
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            RecoveryStatus::Primed
        } else if score >= 60 {
            RecoveryStatus::Ready
        } else if score >= 40 {
            RecoveryStatus::Moderate
        } else {
            RecoveryStatus::Strained
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RecoveryStatus::Primed => "Primed (well recovered)",
            RecoveryStatus::Ready => "Ready for normal training",
            RecoveryStatus::Moderate => "Partially recovered",
            RecoveryStatus::Strained => "Strained (recovery needed)",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            RecoveryStatus::Primed => "Good day for a hard session or a race effort",
            RecoveryStatus::Ready => "Continue with your planned training",
            RecoveryStatus::Moderate => "Keep intensity low and favour technique or endurance work",
            RecoveryStatus::Strained => "Prioritise rest, sleep and easy movement today",
        }
    }
}

/// Combines metric score cards and the cooldown adjustment into a [`RecoveryScore`]
#[derive(Debug, Clone, Default)]
pub struct RecoveryAggregator;

impl RecoveryAggregator {
    pub fn new() -> Self {
        RecoveryAggregator
    }

    /// Weighted biometric score and the total weight behind it.
    ///
    /// Only the first card of each metric kind counts. A total weight of zero
    /// yields a score of 0, which callers must present as low confidence.
    pub fn biometric_score(&self, metric_scores: &[MetricScore]) -> (u8, u32) {
        let mut seen = HashSet::new();
        let mut weighted_sum = 0u32;
        let mut total_weight = 0u32;

        for score in metric_scores {
            if !seen.insert(score.kind) {
                continue;
            }
            let weight = metric_weight(score.kind);
            weighted_sum += contribution(score) * weight;
            total_weight += weight;
        }

        if total_weight == 0 {
            return (0, 0);
        }
        ((weighted_sum / total_weight).min(100) as u8, total_weight)
    }

    /// Attenuate a score by the cooldown adjustment
    pub fn apply_cooldown(&self, overall_score: u8, cooldown_adjustment: u8) -> u8 {
        if cooldown_adjustment >= RESTING_ADJUSTMENT {
            return overall_score;
        }
        (u32::from(overall_score) * u32::from(cooldown_adjustment) / 100) as u8
    }

    pub fn aggregate(
        &self,
        date: NaiveDate,
        metric_scores: Vec<MetricScore>,
        training_load_score: i64,
        cooldown_adjustment: u8,
    ) -> RecoveryScore {
        let (biometric_score, total_weight) = self.biometric_score(&metric_scores);
        let overall_score = self.apply_cooldown(biometric_score, cooldown_adjustment);

        let kinds: HashSet<MetricKind> = metric_scores.iter().map(|m| m.kind).collect();
        let completeness = if total_weight == 0 {
            DataCompleteness::None
        } else if kinds.len() == MetricKind::ALL.len() {
            DataCompleteness::Full
        } else {
            DataCompleteness::Partial
        };

        debug!(
            %date,
            biometric_score,
            overall_score,
            total_weight,
            cooldown_adjustment,
            ?completeness,
            "Aggregated recovery score"
        );

        RecoveryScore {
            date,
            overall_score,
            biometric_score,
            metric_scores,
            training_load_score,
            cooldown_adjustment: cooldown_adjustment.min(RESTING_ADJUSTMENT),
            completeness,
        }
    }

    /// Human-readable guidance for a computed score
    pub fn generate_recommendations(&self, score: &RecoveryScore) -> Vec<String> {
        let mut recommendations = Vec::new();

        if score.is_low_confidence() {
            recommendations.push(
                "No biometric data available - the score is not reliable today".to_string(),
            );
            return recommendations;
        }

        let status = RecoveryStatus::from_score(score.overall_score);
        recommendations.push(status.recommendation().to_string());

        if score.cooldown_adjustment < RESTING_ADJUSTMENT {
            recommendations.push(format!(
                "Still recovering from your last activity ({}% of normal readiness)",
                score.cooldown_adjustment
            ));
        }

        for metric in &score.metric_scores {
            if metric.trend == DeltaTrend::Unfavorable {
                recommendations.push(format!("{}: {}", metric.title, metric.description));
            }
        }

        if score.completeness == DataCompleteness::Partial {
            recommendations
                .push("Some metrics were missing; the score uses the available data".to_string());
        }

        recommendations
    }
}
