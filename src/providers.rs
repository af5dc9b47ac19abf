//! Data collaborator contracts
//!
//! Acquisition of biometric and workout samples happens outside this crate.
//! The engine only depends on these traits; a failure reported by a provider
//! is treated as "no data" for that refresh.

use crate::error::{ProviderError, RecoveryRsError};
use crate::models::{Activity, MetricKind, MetricSeries};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Current value and trailing samples for one metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub current: Option<f64>,
    pub series: MetricSeries,
}

/// Source of biometric readings
pub trait BiometricProvider: Send + Sync {
    /// Reading for `kind` covering the `window_days` days up to `today`.
    /// `Ok(None)` means the source has nothing for this metric.
    fn reading(
        &self,
        kind: MetricKind,
        window_days: u16,
        today: NaiveDate,
    ) -> Result<Option<MetricReading>, ProviderError>;
}

/// Source of completed activities
pub trait ActivityProvider: Send + Sync {
    /// Activities that started within `[since, until]`
    fn activities(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ProviderError>;
}

/// A dated sample in a snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Biometric entry in a snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricEntry {
    pub kind: MetricKind,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub samples: Vec<SamplePoint>,
}

/// JSON snapshot of locally available data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub biometrics: Vec<BiometricEntry>,
}

#[derive(Debug, Default)]
struct StaticData {
    readings: HashMap<MetricKind, (Option<f64>, Vec<SamplePoint>)>,
    activities: Vec<Activity>,
}

/// In-memory provider backed by a snapshot; new data can be pushed at any time
#[derive(Debug, Default)]
pub struct StaticProvider {
    data: RwLock<StaticData>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let provider = Self::new();
        for entry in snapshot.biometrics {
            provider.set_reading(entry.kind, entry.current, entry.samples);
        }
        for activity in snapshot.activities {
            provider.add_activity(activity);
        }
        provider
    }

    /// Load a JSON snapshot file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, RecoveryRsError> {
        let content = fs::read_to_string(&path)?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|e| ProviderError::Malformed {
                source_name: path.as_ref().display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn set_reading(&self, kind: MetricKind, current: Option<f64>, samples: Vec<SamplePoint>) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.readings.insert(kind, (current, samples));
    }

    pub fn add_activity(&self, activity: Activity) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.activities.push(activity);
    }
}

impl BiometricProvider for StaticProvider {
    fn reading(
        &self,
        kind: MetricKind,
        window_days: u16,
        today: NaiveDate,
    ) -> Result<Option<MetricReading>, ProviderError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let Some((current, samples)) = data.readings.get(&kind) else {
            return Ok(None);
        };

        let points = samples
            .iter()
            .filter(|p| {
                let age = (today - p.date).num_days();
                age >= 0 && age < i64::from(window_days)
            })
            .map(|p| (p.date, p.value));
        let series = MetricSeries::from_points(kind, points);

        if current.is_none() && series.is_empty() {
            return Ok(None);
        }
        Ok(Some(MetricReading {
            current: *current,
            series,
        }))
    }
}

impl ActivityProvider for StaticProvider {
    fn activities(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ProviderError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .activities
            .iter()
            .filter(|a| a.start_time >= since && a.start_time <= until)
            .cloned()
            .collect())
    }
}
