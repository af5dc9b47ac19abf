//! Historical recovery-time learning
//!
//! Mines the athlete's own activity spacing to estimate how long they
//! typically wait before repeating a session of the same type and intensity.
//! The resulting [`RecoveryTimeTable`] personalizes the cooldown model.
//!
//! Gaps shorter than 8 hours are treated as repeats within one training
//! session and gaps longer than 7 days as unrelated breaks; neither says
//! anything about recovery and both are discarded.

use crate::models::{Activity, ActivityType, Intensity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Learner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Trailing history mined for observations (default: 30 days)
    pub history_days: u16,

    /// Shortest gap accepted as a recovery observation
    pub min_gap_hours: u16,

    /// Longest gap accepted as a recovery observation
    pub max_gap_hours: u16,

    /// Tables older than this are ignored and the defaults apply
    pub table_max_age_hours: u16,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            history_days: 30,
            min_gap_hours: 8,
            max_gap_hours: 7 * 24,
            table_max_age_hours: 24,
        }
    }
}

/// Learned recovery expectation for one (type, intensity) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEstimate {
    pub activity_type: ActivityType,
    pub intensity: Intensity,

    /// Mean of the accepted, duration-scaled gaps in seconds
    pub expected_recovery_seconds: f64,

    /// Number of accepted gaps behind the estimate
    pub observations: usize,
}

type GroupKey = (ActivityType, Intensity);

/// Empirical expected-recovery table keyed by (activity type, intensity)
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryTimeTable {
    estimates: HashMap<GroupKey, RecoveryEstimate>,
    average_durations: HashMap<GroupKey, f64>,
    learned_at: DateTime<Utc>,
    max_age: Duration,
}

impl RecoveryTimeTable {
    /// A table with no observations; every lookup falls back to defaults
    pub fn empty(learned_at: DateTime<Utc>) -> Self {
        RecoveryTimeTable {
            estimates: HashMap::new(),
            average_durations: HashMap::new(),
            learned_at,
            max_age: Duration::hours(LearnerConfig::default().table_max_age_hours as i64),
        }
    }

    pub fn learned_at(&self) -> DateTime<Utc> {
        self.learned_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.learned_at > self.max_age
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// Learned estimate, ignoring the table's age
    pub fn estimate(
        &self,
        activity_type: ActivityType,
        intensity: Intensity,
    ) -> Option<&RecoveryEstimate> {
        self.estimates.get(&(activity_type, intensity))
    }

    /// Expected recovery seconds, or `None` when unknown or the table is stale
    pub fn expected_recovery_seconds(
        &self,
        activity_type: ActivityType,
        intensity: Intensity,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        if self.is_stale(now) {
            return None;
        }
        self.estimate(activity_type, intensity)
            .map(|e| e.expected_recovery_seconds)
    }

    /// Historical mean duration for the group, when at least two sessions exist
    pub fn average_duration_seconds(
        &self,
        activity_type: ActivityType,
        intensity: Intensity,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        if self.is_stale(now) {
            return None;
        }
        self.average_durations
            .get(&(activity_type, intensity))
            .copied()
    }

    /// All learned estimates, ordered by type then intensity
    pub fn estimates(&self) -> Vec<&RecoveryEstimate> {
        let mut estimates: Vec<&RecoveryEstimate> = self.estimates.values().collect();
        estimates.sort_by_key(|e| (e.activity_type, e.intensity));
        estimates
    }
}

/// Builds [`RecoveryTimeTable`]s from the activity log
#[derive(Debug, Clone, Default)]
pub struct HistoricalRecoveryLearner {
    config: LearnerConfig,
}

impl HistoricalRecoveryLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LearnerConfig) -> Self {
        HistoricalRecoveryLearner { config }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Learn expected recovery durations from activities in the trailing history window
    pub fn learn(&self, activities: &[Activity], now: DateTime<Utc>) -> RecoveryTimeTable {
        let since = now - Duration::days(self.config.history_days as i64);
        let min_gap = (self.config.min_gap_hours as f64) * 3600.0;
        let max_gap = (self.config.max_gap_hours as f64) * 3600.0;

        let mut groups: BTreeMap<GroupKey, Vec<&Activity>> = BTreeMap::new();
        for activity in activities
            .iter()
            .filter(|a| a.start_time >= since && a.start_time <= now)
        {
            groups
                .entry((activity.activity_type, activity.intensity))
                .or_default()
                .push(activity);
        }

        let mut estimates = HashMap::new();
        let mut average_durations = HashMap::new();

        for (key, mut group) in groups {
            group.sort_by_key(|a| a.start_time);

            if group.len() >= 2 {
                let durations: Vec<f64> = group
                    .iter()
                    .map(|a| a.effective_duration_seconds() as f64)
                    .collect();
                average_durations.insert(key, durations.iter().mean());
            }

            let observations: Vec<f64> = group
                .windows(2)
                .filter_map(|pair| {
                    let gap = (pair[1].start_time - pair[0].start_time).num_seconds() as f64;
                    if gap < min_gap || gap > max_gap {
                        return None;
                    }
                    // Scaling may shorten an observation but never extend it
                    let scaled = (gap * pair[0].duration_hours().sqrt()).min(gap);
                    (scaled > 0.0).then_some(scaled)
                })
                .collect();

            if observations.is_empty() {
                debug!(
                    activity_type = %key.0,
                    intensity = %key.1,
                    sessions = group.len(),
                    "No usable recovery gaps"
                );
                continue;
            }

            let expected = observations.iter().mean();
            estimates.insert(
                key,
                RecoveryEstimate {
                    activity_type: key.0,
                    intensity: key.1,
                    expected_recovery_seconds: expected,
                    observations: observations.len(),
                },
            );
        }

        info!(
            groups = estimates.len(),
            history_days = self.config.history_days,
            "Learned recovery time table"
        );

        RecoveryTimeTable {
            estimates,
            average_durations,
            learned_at: now,
            max_age: Duration::hours(self.config.table_max_age_hours as i64),
        }
    }
}
