use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Biometric metrics that feed the recovery score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Resting heart rate in beats per minute
    HeartRate,
    /// Heart rate variability (SDNN/RMSSD) in milliseconds
    Hrv,
    /// Sleep duration in hours
    SleepDuration,
    /// Sleep quality in points (0-100)
    SleepQuality,
}

/// Direction in which a metric change indicates better recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    LowerIsBetter,
    HigherIsBetter,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::HeartRate,
        MetricKind::Hrv,
        MetricKind::SleepDuration,
        MetricKind::SleepQuality,
    ];

    pub fn polarity(&self) -> Polarity {
        match self {
            MetricKind::HeartRate => Polarity::LowerIsBetter,
            MetricKind::Hrv | MetricKind::SleepDuration | MetricKind::SleepQuality => {
                Polarity::HigherIsBetter
            }
        }
    }

    /// Display title used on score cards
    pub fn title(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "Resting Heart Rate",
            MetricKind::Hrv => "Heart Rate Variability",
            MetricKind::SleepDuration => "Sleep Duration",
            MetricKind::SleepQuality => "Sleep Quality",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "bpm",
            MetricKind::Hrv => "ms",
            MetricKind::SleepDuration => "h",
            MetricKind::SleepQuality => "pts",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::HeartRate => write!(f, "heart_rate"),
            MetricKind::Hrv => write!(f, "hrv"),
            MetricKind::SleepDuration => write!(f, "sleep_duration"),
            MetricKind::SleepQuality => write!(f, "sleep_quality"),
        }
    }
}

/// A single daily biometric reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub date: NaiveDate,
    pub value: f64,
    pub kind: MetricKind,
}

/// Date-ordered samples for one metric, at most one per calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    kind: MetricKind,
    samples: Vec<MetricSample>,
}

impl MetricSeries {
    /// Build a series from raw `(date, value)` pairs.
    ///
    /// Non-finite values are dropped. When several samples share a date the
    /// last one supplied wins.
    pub fn from_points<I>(kind: MetricKind, points: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        let mut samples: Vec<MetricSample> = Vec::new();
        for (date, value) in points {
            if !value.is_finite() {
                continue;
            }
            match samples.iter_mut().find(|s| s.date == date) {
                Some(existing) => existing.value = value,
                None => samples.push(MetricSample { date, value, kind }),
            }
        }
        samples.sort_by_key(|s| s.date);

        MetricSeries { kind, samples }
    }

    pub fn empty(kind: MetricKind) -> Self {
        MetricSeries {
            kind,
            samples: Vec::new(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Most recent sample, if any
    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    /// Sample recorded on a given day
    pub fn on(&self, date: NaiveDate) -> Option<&MetricSample> {
        self.samples.iter().find(|s| s.date == date)
    }
}

/// Whether a delta from baseline points toward better or worse recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaTrend {
    Favorable,
    Stable,
    Unfavorable,
}

impl fmt::Display for DeltaTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaTrend::Favorable => write!(f, "favorable"),
            DeltaTrend::Stable => write!(f, "stable"),
            DeltaTrend::Unfavorable => write!(f, "unfavorable"),
        }
    }
}

/// Per-metric score card, recomputed on every refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub kind: MetricKind,

    /// Raw metric score (0-100). Heart rate is inverted during aggregation.
    pub score: u8,

    pub title: String,

    pub description: String,

    pub series: MetricSeries,

    /// Value the score was computed for
    pub current_value: f64,

    /// Trailing mean excluding the current day
    pub baseline: f64,

    pub delta_from_baseline: f64,

    /// Polarity-aware direction of the delta
    pub is_favorable: bool,

    /// Stable when the delta sits within the metric's stability threshold
    pub trend: DeltaTrend,
}

/// Activity categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Run,
    Ride,
    Swim,
    Walk,
    Workout,
    #[serde(other)]
    Other,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityType::Run => write!(f, "run"),
            ActivityType::Ride => write!(f, "ride"),
            ActivityType::Swim => write!(f, "swim"),
            ActivityType::Walk => write!(f, "walk"),
            ActivityType::Workout => write!(f, "workout"),
            ActivityType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = std::convert::Infallible;

    /// Unknown activity names map to `Other`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "run" | "running" => ActivityType::Run,
            "ride" | "cycling" | "bike" => ActivityType::Ride,
            "swim" | "swimming" => ActivityType::Swim,
            "walk" | "walking" | "hike" => ActivityType::Walk,
            "workout" | "strength" => ActivityType::Workout,
            _ => ActivityType::Other,
        })
    }
}

/// Self-reported or derived session intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Intensity {
    Low,
    Moderate,
    High,
}

impl std::str::FromStr for Intensity {
    type Err = std::convert::Infallible;

    /// Unknown intensity names map to `Moderate`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "low" | "easy" | "recovery" => Intensity::Low,
            "high" | "hard" | "max" => Intensity::High,
            _ => Intensity::Moderate,
        })
    }
}

impl From<String> for Intensity {
    fn from(name: String) -> Self {
        name.parse().unwrap_or(Intensity::Moderate)
    }
}

impl Intensity {
    /// Ordinal level used for averaging (1 = low, 3 = high)
    pub fn level(&self) -> u8 {
        match self {
            Intensity::Low => 1,
            Intensity::Moderate => 2,
            Intensity::High => 3,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intensity::Low => write!(f, "low"),
            Intensity::Moderate => write!(f, "moderate"),
            Intensity::High => write!(f, "high"),
        }
    }
}

/// Longest duration credited to a single activity (one week)
pub const MAX_ACTIVITY_SECONDS: i64 = 7 * 24 * 3600;

/// A completed activity. Immutable once recorded; `id` is the de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Stable unique identifier
    pub id: String,

    pub activity_type: ActivityType,

    /// When the activity started
    pub start_time: DateTime<Utc>,

    /// Duration of the activity in seconds
    pub duration_seconds: i64,

    /// Distance covered in meters
    pub distance_meters: Option<f64>,

    pub intensity: Intensity,

    /// Origin of the record (manual entry, import, platform name)
    pub source: Option<String>,
}

impl Activity {
    /// Create a manually entered activity with a generated id
    pub fn new(
        activity_type: ActivityType,
        start_time: DateTime<Utc>,
        duration_seconds: i64,
        intensity: Intensity,
    ) -> Self {
        Activity {
            id: uuid::Uuid::new_v4().to_string(),
            activity_type,
            start_time,
            duration_seconds,
            distance_meters: None,
            intensity,
            source: Some("manual".to_string()),
        }
    }

    /// Calendar day of the activity
    pub fn date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    /// Duration clamped to `0..=MAX_ACTIVITY_SECONDS` for malformed values
    pub fn effective_duration_seconds(&self) -> i64 {
        self.duration_seconds.clamp(0, MAX_ACTIVITY_SECONDS)
    }

    pub fn duration_minutes(&self) -> f64 {
        self.effective_duration_seconds() as f64 / 60.0
    }

    pub fn duration_hours(&self) -> f64 {
        self.effective_duration_seconds() as f64 / 3600.0
    }
}

/// Training volume for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrainingVolume {
    pub date: NaiveDate,

    pub total_duration_minutes: Decimal,

    /// Duration-weighted mean intensity level (0 on rest days)
    pub average_intensity: Decimal,

    pub activity_count: u16,

    /// Sum of per-activity load for the day
    pub training_load: Decimal,
}

impl DailyTrainingVolume {
    pub fn rest_day(date: NaiveDate) -> Self {
        DailyTrainingVolume {
            date,
            total_duration_minutes: Decimal::ZERO,
            average_intensity: Decimal::ZERO,
            activity_count: 0,
            training_load: Decimal::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.activity_count > 0
    }
}

/// Active-day to rest-day ratio over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRestRatio {
    pub active_days: u32,
    pub rest_days: u32,
}

impl WorkRestRatio {
    /// Reduce to lowest terms. A side of zero is left unreduced so an
    /// all-rest week still reads `0:7`.
    pub fn new(active_days: u32, rest_days: u32) -> Self {
        if active_days == 0 || rest_days == 0 {
            return WorkRestRatio {
                active_days,
                rest_days,
            };
        }
        let divisor = gcd(active_days, rest_days);
        WorkRestRatio {
            active_days: active_days / divisor,
            rest_days: rest_days / divisor,
        }
    }
}

impl fmt::Display for WorkRestRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.active_days, self.rest_days)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// How much of the weighted metric set contributed to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCompleteness {
    /// Every metric kind was available
    Full,
    /// Some metrics were missing; weights were redistributed
    Partial,
    /// No metric was available
    None,
}

/// Composite readiness score for a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryScore {
    pub date: NaiveDate,

    /// Final score (0-100) after cooldown attenuation
    pub overall_score: u8,

    /// Weighted biometric score before cooldown attenuation
    pub biometric_score: u8,

    pub metric_scores: Vec<MetricScore>,

    /// Current training load over the load window
    pub training_load_score: i64,

    /// Cooldown adjustment (0-100) applied to the biometric score
    pub cooldown_adjustment: u8,

    pub completeness: DataCompleteness,
}

impl RecoveryScore {
    /// True when no metric contributed weight to the score
    pub fn is_low_confidence(&self) -> bool {
        self.completeness == DataCompleteness::None
    }

    pub fn metric(&self, kind: MetricKind) -> Option<&MetricScore> {
        self.metric_scores.iter().find(|m| m.kind == kind)
    }
}
