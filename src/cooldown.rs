//! Post-activity cooldown state machine
//!
//! A completed activity temporarily depresses the recovery score. The machine
//! records the initial reduction when the activity is processed and then lets
//! the adjustment climb back to 100 along a sigmoid curve as time passes:
//!
//! ```text
//! Resting ──process(activity)──▶ Recovering ──tick(now ≥ start + expected)──▶ Resting
//! ```
//!
//! # Invariants
//!
//! - An activity id affects the state at most once.
//! - While a cooldown is active, `current_adjustment` never decreases:
//!   `tick` keeps the maximum of the previous and the freshly computed value,
//!   so re-evaluation or a clock stepping backwards cannot undo recovery.
//! - `expected_recovery_seconds` is fixed when the cooldown starts. Learning
//!   new history mid-cooldown affects only the next activity.

use crate::history::RecoveryTimeTable;
use crate::models::{Activity, Intensity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Fully recovered adjustment
pub const RESTING_ADJUSTMENT: u8 = 100;

/// One value per intensity level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityTable {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
}

impl IntensityTable {
    pub fn get(&self, intensity: Intensity) -> f64 {
        match intensity {
            Intensity::Low => self.low,
            Intensity::Moderate => self.moderate,
            Intensity::High => self.high,
        }
    }
}

/// Cooldown model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Fallback recovery hours when nothing was learned for the group
    pub base_recovery_hours: IntensityTable,

    /// Initial score reduction in percent before duration scaling
    pub base_reduction_pct: IntensityTable,

    /// Lower bound of the duration scaling applied to the reduction
    pub min_duration_factor: f64,

    /// Upper bound of the duration scaling applied to the reduction
    pub max_duration_factor: f64,

    /// Largest reduction a single activity may cause
    pub max_reduction_pct: f64,

    /// Steepness of the recovery sigmoid
    pub curve_steepness: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        CooldownConfig {
            base_recovery_hours: IntensityTable {
                low: 8.0,
                moderate: 24.0,
                high: 36.0,
            },
            base_reduction_pct: IntensityTable {
                low: 5.0,
                moderate: 15.0,
                high: 25.0,
            },
            min_duration_factor: 0.8,
            max_duration_factor: 2.5,
            max_reduction_pct: 80.0,
            curve_steepness: 12.0,
        }
    }
}

/// Whether a cooldown is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryPhase {
    Resting,
    Recovering,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::Resting => write!(f, "Resting"),
            RecoveryPhase::Recovering => write!(f, "Recovering"),
        }
    }
}

/// Persistent cooldown state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownState {
    pub last_processed_activity_id: Option<String>,

    pub cooldown_start_time: Option<DateTime<Utc>>,

    /// Frozen at `process` time for the lifetime of the cooldown
    pub expected_recovery_seconds: f64,

    /// Adjustment right after the activity was processed
    pub initial_adjustment: u8,

    /// Current adjustment (0-100)
    pub current_adjustment: u8,
}

impl Default for CooldownState {
    fn default() -> Self {
        CooldownState {
            last_processed_activity_id: None,
            cooldown_start_time: None,
            expected_recovery_seconds: 0.0,
            initial_adjustment: RESTING_ADJUSTMENT,
            current_adjustment: RESTING_ADJUSTMENT,
        }
    }
}

impl CooldownState {
    pub fn phase(&self) -> RecoveryPhase {
        if self.cooldown_start_time.is_some() {
            RecoveryPhase::Recovering
        } else {
            RecoveryPhase::Resting
        }
    }
}

/// An activity that has already been applied to the cooldown
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessedActivity {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

/// Recovery shape: slow start, fast middle, tapering end
pub fn recovery_curve(progress: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (progress - 0.5)).exp())
}

/// Tracks how the most recent activity depresses the recovery score
#[derive(Debug, Clone, Default)]
pub struct CooldownStateMachine {
    config: CooldownConfig,
    state: CooldownState,
    /// Activity id to start time
    processed: HashMap<String, DateTime<Utc>>,
}

impl CooldownStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CooldownConfig) -> Self {
        CooldownStateMachine {
            config,
            ..Self::default()
        }
    }

    /// Rebuild the machine from persisted state
    pub fn restore<I>(config: CooldownConfig, state: CooldownState, processed: I) -> Self
    where
        I: IntoIterator<Item = ProcessedActivity>,
    {
        let mut processed: HashMap<String, DateTime<Utc>> = processed
            .into_iter()
            .map(|p| (p.id, p.start_time))
            .collect();
        if let (Some(id), Some(start)) =
            (&state.last_processed_activity_id, state.cooldown_start_time)
        {
            processed.entry(id.clone()).or_insert(start);
        }

        CooldownStateMachine {
            config,
            state,
            processed,
        }
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.state.phase()
    }

    pub fn current_adjustment(&self) -> u8 {
        self.state.current_adjustment
    }

    pub fn has_processed(&self, activity_id: &str) -> bool {
        self.processed.contains_key(activity_id)
    }

    /// Processed activities ordered by id
    pub fn processed(&self) -> Vec<ProcessedActivity> {
        let mut processed: Vec<ProcessedActivity> = self
            .processed
            .iter()
            .map(|(id, start)| ProcessedActivity {
                id: id.clone(),
                start_time: *start,
            })
            .collect();
        processed.sort();
        processed
    }

    /// Forget processed activities that started before `before`.
    ///
    /// Only safe for activities that can no longer be offered to `process`.
    /// The activity driving an active cooldown is always kept. Returns the
    /// number of entries removed.
    pub fn prune_processed(&mut self, before: DateTime<Utc>) -> usize {
        let active = self.state.last_processed_activity_id.clone();
        let len = self.processed.len();
        self.processed
            .retain(|id, start| *start >= before || active.as_deref() == Some(id.as_str()));
        len - self.processed.len()
    }

    /// Start a cooldown for a completed activity.
    ///
    /// Returns the resulting adjustment. An activity that was already
    /// processed leaves the state untouched.
    pub fn process(
        &mut self,
        activity: &Activity,
        table: &RecoveryTimeTable,
        now: DateTime<Utc>,
    ) -> u8 {
        if self.state.last_processed_activity_id.as_deref() == Some(activity.id.as_str())
            || self.processed.contains_key(&activity.id)
        {
            debug!(activity_id = %activity.id, "Activity already processed, skipping");
            return self.state.current_adjustment;
        }

        let expected = self.expected_recovery_seconds(activity, table, now);
        let reduction = self.initial_reduction_pct(activity, table, now);
        let initial = (100.0 - reduction).round().clamp(0.0, 100.0) as u8;

        self.processed
            .insert(activity.id.clone(), activity.start_time);

        if !is_usable_window(expected) {
            info!(
                activity_id = %activity.id,
                "Activity has no recovery window, staying at rest"
            );
            self.reset();
            return self.state.current_adjustment;
        }

        self.state = CooldownState {
            last_processed_activity_id: Some(activity.id.clone()),
            cooldown_start_time: Some(now),
            expected_recovery_seconds: expected,
            initial_adjustment: initial,
            current_adjustment: initial,
        };

        info!(
            activity_id = %activity.id,
            activity_type = %activity.activity_type,
            intensity = %activity.intensity,
            expected_hours = expected / 3600.0,
            adjustment = initial,
            "Cooldown started"
        );

        initial
    }

    /// Advance the cooldown to `now` and return the current adjustment
    pub fn tick(&mut self, now: DateTime<Utc>) -> u8 {
        let Some(start) = self.state.cooldown_start_time else {
            return RESTING_ADJUSTMENT;
        };

        let expected = self.state.expected_recovery_seconds;
        let elapsed = elapsed_seconds(start, now);
        if !is_usable_window(expected) || elapsed >= expected {
            info!(
                activity_id = ?self.state.last_processed_activity_id,
                "Cooldown complete"
            );
            self.reset();
            return RESTING_ADJUSTMENT;
        }

        let progress = (elapsed / expected).clamp(0.0, 1.0);
        let initial = f64::from(self.state.initial_adjustment);
        let candidate = initial
            + (100.0 - initial) * recovery_curve(progress, self.config.curve_steepness);
        let candidate = candidate.floor().clamp(0.0, 100.0) as u8;

        self.state.current_adjustment = self.state.current_adjustment.max(candidate);
        self.state.current_adjustment
    }

    /// Share of the recovery window that has elapsed, 0-100
    pub fn percent_recovered(&self, now: DateTime<Utc>) -> f64 {
        match self.state.cooldown_start_time {
            Some(start) if self.state.expected_recovery_seconds > 0.0 => {
                let elapsed = elapsed_seconds(start, now);
                (elapsed / self.state.expected_recovery_seconds * 100.0).clamp(0.0, 100.0)
            }
            _ => 100.0,
        }
    }

    /// Time left until the cooldown ends
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.state.cooldown_start_time {
            Some(start) if is_usable_window(self.state.expected_recovery_seconds) => {
                let left = (self.state.expected_recovery_seconds - elapsed_seconds(start, now))
                    .clamp(0.0, MAX_REMAINING_SECONDS);
                Duration::milliseconds((left * 1000.0).round() as i64)
            }
            _ => Duration::zero(),
        }
    }

    /// Whole days left, rounded up
    pub fn remaining_days(&self, now: DateTime<Utc>) -> u32 {
        let seconds = self.remaining(now).num_seconds();
        if seconds <= 0 {
            return 0;
        }
        ((seconds + 86_399) / 86_400) as u32
    }

    /// Remaining time such as "1d 4h", "5h 20m" or "45m"
    pub fn remaining_time_text(&self, now: DateTime<Utc>) -> String {
        let remaining = self.remaining(now);
        if remaining <= Duration::zero() {
            return "Fully recovered".to_string();
        }

        let minutes = (remaining.num_seconds() + 59) / 60;
        let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
        if days > 0 {
            format!("{}d {}h", days, hours)
        } else if hours > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}m", mins)
        }
    }

    /// One-line status for display and notification text
    pub fn description(&self, now: DateTime<Utc>) -> String {
        match self.phase() {
            RecoveryPhase::Resting => "Recovered from your last activity".to_string(),
            RecoveryPhase::Recovering => format!(
                "{:.0}% recovered, about {} until fully recovered",
                self.percent_recovered(now),
                self.remaining_time_text(now)
            ),
        }
    }

    fn reset(&mut self) {
        self.state = CooldownState::default();
    }

    fn expected_recovery_seconds(
        &self,
        activity: &Activity,
        table: &RecoveryTimeTable,
        now: DateTime<Utc>,
    ) -> f64 {
        let duration_scale = activity.duration_hours().sqrt();
        let base = table
            .expected_recovery_seconds(activity.activity_type, activity.intensity, now)
            .unwrap_or_else(|| self.config.base_recovery_hours.get(activity.intensity) * 3600.0);

        base * duration_scale
    }

    fn initial_reduction_pct(
        &self,
        activity: &Activity,
        table: &RecoveryTimeTable,
        now: DateTime<Utc>,
    ) -> f64 {
        let duration_factor = match table.average_duration_seconds(
            activity.activity_type,
            activity.intensity,
            now,
        ) {
            Some(average) if average > 0.0 => {
                activity.effective_duration_seconds() as f64 / average
            }
            _ => 1.0 + activity.duration_hours() / 2.0,
        }
        .clamp(self.config.min_duration_factor, self.config.max_duration_factor);

        (self.config.base_reduction_pct.get(activity.intensity) * duration_factor)
            .min(self.config.max_reduction_pct)
    }
}

/// Upper bound on reported remaining time, for corrupted persisted windows
const MAX_REMAINING_SECONDS: f64 = 1.0e9;

fn is_usable_window(seconds: f64) -> bool {
    seconds.is_finite() && seconds > 0.0
}

fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// Single-writer access to a shared [`CooldownStateMachine`].
///
/// `process` and `tick` are serialized through a mutex; `adjustment` reads
/// the last published value without locking.
#[derive(Debug, Clone)]
pub struct CooldownHandle {
    machine: Arc<Mutex<CooldownStateMachine>>,
    snapshot: Arc<AtomicU8>,
}

impl CooldownHandle {
    pub fn new(machine: CooldownStateMachine) -> Self {
        let snapshot = Arc::new(AtomicU8::new(machine.current_adjustment()));
        CooldownHandle {
            machine: Arc::new(Mutex::new(machine)),
            snapshot,
        }
    }

    pub fn process(
        &self,
        activity: &Activity,
        table: &RecoveryTimeTable,
        now: DateTime<Utc>,
    ) -> u8 {
        self.update(|machine| machine.process(activity, table, now))
    }

    pub fn tick(&self, now: DateTime<Utc>) -> u8 {
        self.update(|machine| machine.tick(now))
    }

    pub fn prune_processed(&self, before: DateTime<Utc>) -> usize {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        machine.prune_processed(before)
    }

    /// Last published adjustment
    pub fn adjustment(&self) -> u8 {
        self.snapshot.load(Ordering::Acquire)
    }

    /// Run a read-only query against the machine
    pub fn read<R>(&self, f: impl FnOnce(&CooldownStateMachine) -> R) -> R {
        let machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        f(&machine)
    }

    fn update(&self, f: impl FnOnce(&mut CooldownStateMachine) -> u8) -> u8 {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let adjustment = f(&mut machine);
        self.snapshot.store(adjustment, Ordering::Release);
        adjustment
    }
}
