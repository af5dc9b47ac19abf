//! Recovery engine
//!
//! Owns one athlete's cooldown state and wires the collaborators together:
//! fetch data, score each metric, learn recovery times, advance the cooldown,
//! aggregate and persist. `refresh` is the single entry point used by the
//! periodic loop, by data-arrival notifications and by on-demand callers.

use crate::config::AppConfig;
use crate::cooldown::{CooldownHandle, CooldownStateMachine, RecoveryPhase};
use crate::database::CooldownStore;
use crate::error::{DatabaseError, Result};
use crate::history::{HistoricalRecoveryLearner, RecoveryTimeTable};
use crate::logging::log_error;
use crate::metrics::MetricDeltaAnalyzer;
use crate::models::{
    Activity, DailyTrainingVolume, MetricKind, MetricScore, RecoveryScore, WorkRestRatio,
    MAX_ACTIVITY_SECONDS,
};
use crate::providers::{ActivityProvider, BiometricProvider};
use crate::recovery::RecoveryAggregator;
use crate::training_load::TrainingLoadCalculator;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Cooldown figures exposed to UI and notification collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownSummary {
    pub phase: RecoveryPhase,
    pub adjustment: u8,
    pub percent_recovered: f64,
    pub remaining_text: String,
    pub remaining_days: u32,
    pub description: String,
}

pub struct RecoveryEngine {
    config: AppConfig,
    biometrics: Arc<dyn BiometricProvider>,
    activities: Arc<dyn ActivityProvider>,
    analyzer: MetricDeltaAnalyzer,
    load_calculator: TrainingLoadCalculator,
    learner: HistoricalRecoveryLearner,
    aggregator: RecoveryAggregator,
    cooldown: CooldownHandle,
    table: RwLock<Option<RecoveryTimeTable>>,
    store: Mutex<Box<dyn CooldownStore>>,
    latest: RwLock<Option<RecoveryScore>>,
    refresh_requested: Notify,
    /// Held from cooldown update through persistence so saves land in update order
    update_lock: Mutex<()>,
}

impl RecoveryEngine {
    /// Build an engine, restoring any cooldown state saved in `store`
    pub fn open(
        config: AppConfig,
        biometrics: Arc<dyn BiometricProvider>,
        activities: Arc<dyn ActivityProvider>,
        store: Box<dyn CooldownStore>,
    ) -> Result<Self> {
        let machine = match store.load()? {
            Some(saved) => {
                info!(
                    phase = %saved.state.phase(),
                    adjustment = saved.state.current_adjustment,
                    processed = saved.processed.len(),
                    "Restored cooldown state"
                );
                CooldownStateMachine::restore(
                    config.cooldown.clone(),
                    saved.state,
                    saved.processed,
                )
            }
            None => {
                debug!("No saved cooldown state, starting at rest");
                CooldownStateMachine::with_config(config.cooldown.clone())
            }
        };

        Ok(RecoveryEngine {
            analyzer: MetricDeltaAnalyzer::with_thresholds(config.thresholds.clone()),
            load_calculator: TrainingLoadCalculator::with_config(config.load.clone()),
            learner: HistoricalRecoveryLearner::with_config(config.learner()),
            aggregator: RecoveryAggregator::new(),
            cooldown: CooldownHandle::new(machine),
            table: RwLock::new(None),
            store: Mutex::new(store),
            latest: RwLock::new(None),
            refresh_requested: Notify::new(),
            update_lock: Mutex::new(()),
            config,
            biometrics,
            activities,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Recompute the recovery score as of `now`
    pub fn refresh(&self, now: DateTime<Utc>) -> Result<RecoveryScore> {
        let today = now.date_naive();
        let activities = self.fetch_activities(now);

        let _update = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let table = self.current_table(&activities, now);
        if let Some(latest) = self.latest_activity(&activities, now) {
            self.cooldown.process(latest, &table, now);
        }
        let adjustment = self.cooldown.tick(now);
        let cutoff = self.processed_retention_cutoff(now);
        let pruned = self.cooldown.prune_processed(cutoff);
        if pruned > 0 {
            debug!(pruned, "Forgot processed activities outside the history window");
        }

        let metric_scores = self.score_metrics(today);
        let training_load =
            self.load_calculator
                .load(&activities, self.config.analysis.load_window_days, today);

        let score = self
            .aggregator
            .aggregate(today, metric_scores, training_load, adjustment);

        if score.is_low_confidence() {
            warn!(%today, "No biometric data available, score is low confidence");
        }
        info!(
            %today,
            overall = score.overall_score,
            biometric = score.biometric_score,
            training_load,
            cooldown = adjustment,
            "Recovery score refreshed"
        );

        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(score.clone());
        self.persist(Some(cutoff))?;

        Ok(score)
    }

    /// Advance the cooldown without rescoring biometrics
    pub fn tick(&self, now: DateTime<Utc>) -> Result<u8> {
        let _update = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let adjustment = self.cooldown.tick(now);
        self.persist(None)?;
        Ok(adjustment)
    }

    /// Last score produced by `refresh`
    pub fn latest_score(&self) -> Option<RecoveryScore> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current cooldown adjustment without locking the state machine
    pub fn cooldown_adjustment(&self) -> u8 {
        self.cooldown.adjustment()
    }

    pub fn cooldown_summary(&self, now: DateTime<Utc>) -> CooldownSummary {
        self.cooldown.read(|machine| CooldownSummary {
            phase: machine.phase(),
            adjustment: machine.current_adjustment(),
            percent_recovered: machine.percent_recovered(now),
            remaining_text: machine.remaining_time_text(now),
            remaining_days: machine.remaining_days(now),
            description: machine.description(now),
        })
    }

    /// Daily volumes over the load window, oldest first
    pub fn daily_volumes(&self, now: DateTime<Utc>) -> Vec<DailyTrainingVolume> {
        let activities = self.fetch_activities(now);
        self.load_calculator.daily_volumes(
            &activities,
            self.config.analysis.load_window_days,
            now.date_naive(),
        )
    }

    pub fn work_rest_ratio(&self, now: DateTime<Utc>) -> WorkRestRatio {
        let activities = self.fetch_activities(now);
        self.load_calculator
            .work_rest_ratio_for(&activities, now.date_naive())
    }

    pub fn recommendations(&self, score: &RecoveryScore) -> Vec<String> {
        self.aggregator.generate_recommendations(score)
    }

    /// Run `f` against the learned recovery table, if one has been built
    pub fn with_recovery_table<R>(&self, f: impl FnOnce(Option<&RecoveryTimeTable>) -> R) -> R {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f(table.as_ref())
    }

    /// Ask a running refresh loop to recompute now, e.g. after new data arrived
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Start of the window handed to the activity provider
    fn fetch_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let analysis = &self.config.analysis;
        let days = analysis
            .history_days
            .max(analysis.load_window_days)
            .max(self.config.load.work_rest_window_days);
        now - Duration::days(i64::from(days) + 1)
    }

    /// Activities that started before this can never be offered to the cooldown again
    fn processed_retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lookback = Duration::hours(i64::from(self.config.refresh.cooldown_lookback_hours))
            + Duration::seconds(MAX_ACTIVITY_SECONDS);
        self.fetch_since(now).min(now - lookback)
    }

    fn fetch_activities(&self, now: DateTime<Utc>) -> Vec<Activity> {
        let since = self.fetch_since(now);

        match self.activities.activities(since, now) {
            Ok(activities) => activities,
            Err(e) => {
                warn!(error = %e, "Activity provider failed, treating as no activities");
                Vec::new()
            }
        }
    }

    fn current_table(&self, activities: &[Activity], now: DateTime<Utc>) -> RecoveryTimeTable {
        {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(table) = table.as_ref().filter(|t| !t.is_stale(now)) {
                return table.clone();
            }
        }

        let learned = self.learner.learn(activities, now);
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Some(learned.clone());
        learned
    }

    /// Most recent activity that has started and falls inside the cooldown lookback
    fn latest_activity<'a>(
        &self,
        activities: &'a [Activity],
        now: DateTime<Utc>,
    ) -> Option<&'a Activity> {
        let lookback = Duration::hours(i64::from(self.config.refresh.cooldown_lookback_hours));
        activities
            .iter()
            .filter(|a| a.start_time <= now)
            .max_by_key(|a| a.start_time)
            .filter(|a| {
                match a
                    .start_time
                    .checked_add_signed(Duration::seconds(a.effective_duration_seconds()))
                {
                    Some(end) => now.signed_duration_since(end) <= lookback,
                    None => false,
                }
            })
    }

    fn score_metrics(&self, today: NaiveDate) -> Vec<MetricScore> {
        let window = self.config.analysis.biometric_window_days;

        MetricKind::ALL
            .par_iter()
            .filter_map(|&kind| match self.biometrics.reading(kind, window, today) {
                Ok(Some(reading)) => self.analyzer.score(&reading.series, reading.current, today),
                Ok(None) => {
                    debug!(%kind, "No data for metric");
                    None
                }
                Err(e) => {
                    warn!(%kind, error = %e, "Biometric provider failed, metric omitted");
                    None
                }
            })
            .collect()
    }

    fn persist(&self, prune_before: Option<DateTime<Utc>>) -> Result<()> {
        let (state, processed) = self
            .cooldown
            .read(|machine| (machine.state().clone(), machine.processed()));

        let mut store = self.store.lock().map_err(|_| DatabaseError::Unavailable {
            reason: "cooldown store lock poisoned".to_string(),
        })?;
        store.save(&state, &processed)?;
        if let Some(before) = prune_before {
            store.prune_processed(before, state.last_processed_activity_id.as_deref())?;
        }
        Ok(())
    }
}

/// Refresh `engine` every `period` and whenever a refresh is requested, until
/// `shutdown` flips to `true` or its sender is dropped.
///
/// Returns the number of successful refreshes.
pub async fn run_refresh_loop(
    engine: Arc<RecoveryEngine>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut refreshes = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = engine.refresh_requested.notified() => {
                debug!("On-demand refresh requested");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let worker = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || worker.refresh(Utc::now())).await {
            Ok(Ok(_)) => refreshes += 1,
            Ok(Err(e)) => log_error("refresh", &e),
            Err(e) => warn!(error = %e, "Refresh task panicked"),
        }
    }

    info!(refreshes, "Refresh loop stopped");
    refreshes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryCooldownStore, SqliteCooldownStore};
    use crate::error::ProviderError;
    use crate::models::{ActivityType, Intensity};
    use crate::providers::{MetricReading, SamplePoint, StaticProvider};
    use chrono::TimeZone;

    struct FailingProvider;

    impl BiometricProvider for FailingProvider {
        fn reading(
            &self,
            _kind: MetricKind,
            _window_days: u16,
            _today: NaiveDate,
        ) -> std::result::Result<Option<MetricReading>, ProviderError> {
            Err(ProviderError::AuthorizationDenied {
                source_name: "health".to_string(),
            })
        }
    }

    impl ActivityProvider for FailingProvider {
        fn activities(
            &self,
            _since: DateTime<Utc>,
            _until: DateTime<Utc>,
        ) -> std::result::Result<Vec<Activity>, ProviderError> {
            Err(ProviderError::Unavailable {
                source_name: "health".to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap()
    }

    fn engine_with(provider: Arc<StaticProvider>) -> RecoveryEngine {
        RecoveryEngine::open(
            AppConfig::default(),
            provider.clone(),
            provider,
            Box::new(MemoryCooldownStore::new()),
        )
        .unwrap()
    }

    fn flat(value: f64, days: u32) -> Vec<SamplePoint> {
        (1..=days)
            .map(|d| SamplePoint {
                date: now().date_naive() - Duration::days(i64::from(d)),
                value,
            })
            .collect()
    }

    #[test]
    fn test_refresh_partial_data() {
        let provider = Arc::new(StaticProvider::new());
        provider.set_reading(MetricKind::Hrv, Some(50.0), flat(50.0, 6));
        provider.set_reading(MetricKind::SleepDuration, Some(8.0), flat(7.5, 6));
        let engine = engine_with(provider);

        let score = engine.refresh(now()).unwrap();

        // hrv at baseline scores 70, 8h of sleep scores 100
        assert_eq!(score.biometric_score, 82);
        assert_eq!(score.overall_score, score.biometric_score);
        assert_eq!(score.cooldown_adjustment, 100);
        assert_eq!(engine.latest_score(), Some(score));
    }

    #[test]
    fn test_refresh_applies_cooldown_once() {
        let provider = Arc::new(StaticProvider::new());
        provider.set_reading(MetricKind::Hrv, Some(50.0), flat(50.0, 6));

        let mut run = Activity::new(
            ActivityType::Run,
            now() - Duration::hours(1),
            3600,
            Intensity::High,
        );
        run.id = "run-1".to_string();
        provider.add_activity(run);

        let engine = engine_with(provider);
        let first = engine.refresh(now()).unwrap();
        assert_eq!(first.cooldown_adjustment, 63);
        assert_eq!(first.overall_score, 44);

        let second = engine.refresh(now()).unwrap();
        assert_eq!(second.cooldown_adjustment, 63);
        assert_eq!(engine.cooldown_adjustment(), 63);

        let summary = engine.cooldown_summary(now());
        assert_eq!(summary.phase, RecoveryPhase::Recovering);
        assert_eq!(summary.remaining_days, 2);
        assert_eq!(summary.remaining_text, "1d 12h");
    }

    #[test]
    fn test_old_activity_does_not_start_cooldown() {
        let provider = Arc::new(StaticProvider::new());
        provider.add_activity(Activity::new(
            ActivityType::Ride,
            now() - Duration::days(3),
            7200,
            Intensity::Moderate,
        ));
        let engine = engine_with(provider);

        let score = engine.refresh(now()).unwrap();
        assert_eq!(score.cooldown_adjustment, 100);
        assert!(score.training_load_score > 0);
    }

    #[test]
    fn test_provider_failures_are_absence() {
        let provider = Arc::new(FailingProvider);
        let engine = RecoveryEngine::open(
            AppConfig::default(),
            provider.clone(),
            provider,
            Box::new(MemoryCooldownStore::new()),
        )
        .unwrap();

        let score = engine.refresh(now()).unwrap();
        assert!(score.is_low_confidence());
        assert_eq!(score.training_load_score, 0);
        assert_eq!(engine.work_rest_ratio(now()).to_string(), "0:7");
        assert_eq!(engine.recommendations(&score).len(), 1);
    }

    #[test]
    fn test_absurd_duration_does_not_abort_refresh() {
        let provider = Arc::new(StaticProvider::new());
        provider.set_reading(MetricKind::Hrv, Some(50.0), flat(50.0, 6));
        let mut broken = Activity::new(
            ActivityType::Ride,
            now() - Duration::hours(2),
            200_000_000_000_000_000,
            Intensity::High,
        );
        broken.id = "broken".to_string();
        provider.add_activity(broken);
        let engine = engine_with(provider);

        let score = engine.refresh(now()).unwrap();

        assert!(score.training_load_score > 0);
        assert!(score.cooldown_adjustment < 100);
        assert_eq!(engine.daily_volumes(now()).len(), 7);
        assert!(engine.cooldown_summary(now()).remaining_days > 0);
    }

    #[test]
    fn test_concurrent_refreshes_persist_latest_state() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("recovery.db");

        let provider = Arc::new(StaticProvider::new());
        let mut run = Activity::new(
            ActivityType::Run,
            now() - Duration::hours(1),
            3600,
            Intensity::High,
        );
        run.id = "run-1".to_string();
        provider.add_activity(run);

        let engine = RecoveryEngine::open(
            AppConfig::default(),
            provider.clone(),
            provider.clone(),
            Box::new(SqliteCooldownStore::new(&path).unwrap()),
        )
        .unwrap();

        std::thread::scope(|scope| {
            for hours in [0, 2, 4, 6, 8, 10, 40, 41] {
                let engine = &engine;
                scope.spawn(move || engine.refresh(now() + Duration::hours(hours)).unwrap());
            }
        });
        let expected = engine.cooldown.read(|machine| machine.state().clone());
        drop(engine);

        let reopened = RecoveryEngine::open(
            AppConfig::default(),
            provider.clone(),
            provider,
            Box::new(SqliteCooldownStore::new(&path).unwrap()),
        )
        .unwrap();
        let restored = reopened.cooldown.read(|machine| machine.state().clone());

        assert_eq!(restored, expected);
        assert!(reopened.cooldown.read(|machine| machine.has_processed("run-1")));
    }

    #[test]
    fn test_processed_activities_pruned_after_history_window() {
        let provider = Arc::new(StaticProvider::new());
        let mut run = Activity::new(
            ActivityType::Run,
            now() - Duration::hours(1),
            3600,
            Intensity::High,
        );
        run.id = "run-1".to_string();
        provider.add_activity(run);
        let engine = engine_with(provider);

        engine.refresh(now()).unwrap();
        assert!(engine.cooldown.read(|m| m.has_processed("run-1")));

        // Still inside the fetch window: the id must be remembered
        engine.refresh(now() + Duration::days(10)).unwrap();
        assert!(engine.cooldown.read(|m| m.has_processed("run-1")));

        engine.refresh(now() + Duration::days(40)).unwrap();
        assert!(engine.cooldown.read(|m| m.processed().is_empty()));
        let saved = engine.store.lock().unwrap().load().unwrap().unwrap();
        assert!(saved.processed.is_empty());
    }

    #[test]
    fn test_recovery_table_built_on_refresh() {
        let provider = Arc::new(StaticProvider::new());
        let engine = engine_with(provider);

        assert!(engine.with_recovery_table(|t| t.is_none()));
        engine.refresh(now()).unwrap();
        assert!(engine.with_recovery_table(|t| t.map(|t| t.learned_at()) == Some(now())));
    }
}
