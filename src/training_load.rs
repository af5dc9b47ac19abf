use crate::models::{Activity, ActivityType, DailyTrainingVolume, Intensity, WorkRestRatio};
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Training load configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Contribution lost per day since the activity (default: 5%)
    pub recency_decay_per_day: Decimal,

    /// Minimum contribution of an activity inside the window (default: 70%)
    pub recency_floor: Decimal,

    /// Trailing window for the work:rest ratio in days
    pub work_rest_window_days: u16,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            recency_decay_per_day: dec!(0.05),
            recency_floor: dec!(0.7),
            work_rest_window_days: 7,
        }
    }
}

pub fn intensity_factor(intensity: Intensity) -> Decimal {
    match intensity {
        Intensity::Low => dec!(1.0),
        Intensity::Moderate => dec!(2.5),
        Intensity::High => dec!(4.0),
    }
}

pub fn activity_type_factor(activity_type: ActivityType) -> Decimal {
    match activity_type {
        ActivityType::Run => dec!(1.2),
        ActivityType::Workout => dec!(1.1),
        ActivityType::Ride => dec!(1.0),
        ActivityType::Swim => dec!(0.8),
        ActivityType::Walk => dec!(0.5),
        ActivityType::Other => dec!(1.0),
    }
}

/// Piecewise duration scaling.
///
/// - 0-30 min: linear ramp 0 -> 1.0
/// - 30-60 min: ramp 1.0 -> 1.5
/// - beyond 60 min: +0.25 per further hour
pub fn duration_scaling(minutes: Decimal) -> Decimal {
    let minutes = minutes.max(Decimal::ZERO);
    if minutes <= dec!(30) {
        minutes / dec!(30)
    } else if minutes <= dec!(60) {
        Decimal::ONE + (minutes - dec!(30)) / dec!(30) * dec!(0.5)
    } else {
        dec!(1.5) + (minutes - dec!(60)) / dec!(60) * dec!(0.25)
    }
}

/// Calculates training load, daily volume and work:rest balance from an activity log
pub struct TrainingLoadCalculator {
    config: LoadConfig,
}

impl TrainingLoadCalculator {
    /// Create new calculator with default configuration
    pub fn new() -> Self {
        TrainingLoadCalculator {
            config: LoadConfig::default(),
        }
    }

    /// Create new calculator with custom configuration
    pub fn with_config(config: LoadConfig) -> Self {
        TrainingLoadCalculator { config }
    }

    /// Contribution weight of an activity `days_since` days old
    pub fn recency_factor(&self, days_since: i64) -> Decimal {
        let decayed = Decimal::ONE - self.config.recency_decay_per_day * Decimal::from(days_since.max(0));
        decayed.max(self.config.recency_floor)
    }

    /// Load contributed by one activity as seen from `today`
    pub fn activity_load(&self, activity: &Activity, today: NaiveDate) -> Decimal {
        let minutes = Decimal::from(activity.effective_duration_seconds()) / dec!(60);
        let days_since = (today - activity.date()).num_days();

        minutes
            * intensity_factor(activity.intensity)
            * duration_scaling(minutes)
            * activity_type_factor(activity.activity_type)
            * self.recency_factor(days_since)
    }

    /// Total load for activities in the last `window_days` calendar days, today included
    pub fn load(&self, activities: &[Activity], window_days: u16, today: NaiveDate) -> i64 {
        let total: Decimal = activities
            .iter()
            .filter(|a| in_window(a.date(), window_days, today))
            .map(|a| self.activity_load(a, today))
            .sum();

        total.round().to_i64().unwrap_or(i64::MAX)
    }

    /// Bucket activities by calendar day
    pub fn aggregate_daily(
        &self,
        activities: &[Activity],
        today: NaiveDate,
    ) -> BTreeMap<NaiveDate, DailyTrainingVolume> {
        let mut daily: BTreeMap<NaiveDate, DailyTrainingVolume> = BTreeMap::new();
        // Running duration-weighted intensity sums per day
        let mut weighted: BTreeMap<NaiveDate, (Decimal, Decimal)> = BTreeMap::new();

        for activity in activities {
            let date = activity.date();
            let minutes = Decimal::from(activity.effective_duration_seconds()) / dec!(60);
            let load = self.activity_load(activity, today);
            let level = Decimal::from(activity.intensity.level());

            daily
                .entry(date)
                .and_modify(|day| {
                    day.total_duration_minutes += minutes;
                    day.activity_count += 1;
                    day.training_load += load;
                })
                .or_insert(DailyTrainingVolume {
                    date,
                    total_duration_minutes: minutes,
                    average_intensity: Decimal::ZERO,
                    activity_count: 1,
                    training_load: load,
                });

            let sums = weighted.entry(date).or_insert((Decimal::ZERO, Decimal::ZERO));
            sums.0 += level * minutes;
            sums.1 += level;
        }

        for (date, day) in daily.iter_mut() {
            if let Some((level_minutes, levels)) = weighted.get(date) {
                day.average_intensity = if day.total_duration_minutes > Decimal::ZERO {
                    *level_minutes / day.total_duration_minutes
                } else {
                    // Zero-length sessions only: fall back to a plain mean
                    *levels / Decimal::from(day.activity_count)
                };
            }
        }

        daily
    }

    /// One volume record per day of the window (oldest first), rest days included
    pub fn daily_volumes(
        &self,
        activities: &[Activity],
        window_days: u16,
        today: NaiveDate,
    ) -> Vec<DailyTrainingVolume> {
        let in_range: Vec<Activity> = activities
            .iter()
            .filter(|a| in_window(a.date(), window_days, today))
            .cloned()
            .collect();
        let mut daily = self.aggregate_daily(&in_range, today);

        let mut volumes = Vec::with_capacity(window_days as usize);
        for offset in (0..window_days as u64).rev() {
            let Some(date) = today.checked_sub_days(chrono::Days::new(offset)) else {
                continue;
            };
            volumes.push(
                daily
                    .remove(&date)
                    .unwrap_or_else(|| DailyTrainingVolume::rest_day(date)),
            );
        }

        debug!(
            window_days,
            active_days = volumes.iter().filter(|v| v.is_active()).count(),
            "Computed daily training volumes"
        );

        volumes
    }

    /// Active:rest days over the trailing window of the supplied volumes
    pub fn work_rest_ratio(&self, volumes: &[DailyTrainingVolume]) -> WorkRestRatio {
        let window = self.config.work_rest_window_days as usize;
        let recent = &volumes[volumes.len().saturating_sub(window)..];

        let active = recent.iter().filter(|v| v.is_active()).count() as u32;
        let rest = recent.len() as u32 - active;

        WorkRestRatio::new(active, rest)
    }

    /// Convenience: work:rest ratio straight from the activity log
    pub fn work_rest_ratio_for(&self, activities: &[Activity], today: NaiveDate) -> WorkRestRatio {
        let volumes = self.daily_volumes(activities, self.config.work_rest_window_days, today);
        self.work_rest_ratio(&volumes)
    }
}

impl Default for TrainingLoadCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn in_window(date: NaiveDate, window_days: u16, today: NaiveDate) -> bool {
    let days_since = (today - date).num_days();
    days_since >= 0 && days_since < i64::from(window_days)
}
