use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use recoveryrs::models::{Activity, ActivityType, Intensity, MetricKind, MetricSeries};
use recoveryrs::{
    CooldownStateMachine, HistoricalRecoveryLearner, MetricDeltaAnalyzer, RecoveryTimeTable,
    TrainingLoadCalculator,
};

/// Performance benchmarks for the recovery calculations
///
/// Inputs are bounded by the history window, so these mostly guard against
/// accidental quadratic behaviour as the activity log grows.

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 30, 12, 0, 0).unwrap()
}

fn create_activity_log(count: usize) -> Vec<Activity> {
    let types = [
        ActivityType::Run,
        ActivityType::Ride,
        ActivityType::Swim,
        ActivityType::Workout,
    ];
    let intensities = [Intensity::Low, Intensity::Moderate, Intensity::High];

    (0..count)
        .map(|i| Activity {
            id: format!("activity-{}", i),
            activity_type: types[i % types.len()],
            start_time: now() - Duration::hours((i as i64) * 30 * 24 / count.max(1) as i64),
            duration_seconds: 1800 + (i as i64 % 5) * 900,
            distance_meters: None,
            intensity: intensities[i % intensities.len()],
            source: Some("bench".to_string()),
        })
        .collect()
}

fn bench_learner(c: &mut Criterion) {
    let learner = HistoricalRecoveryLearner::new();
    let mut group = c.benchmark_group("Recovery Learner");

    for &size in &[10, 60, 240] {
        let activities = create_activity_log(size);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("learn", size), &activities, |b, activities| {
            b.iter(|| learner.learn(black_box(activities), now()));
        });
    }

    group.finish();
}

fn bench_training_load(c: &mut Criterion) {
    let calculator = TrainingLoadCalculator::new();
    let today = now().date_naive();
    let mut group = c.benchmark_group("Training Load");

    for &size in &[10, 60, 240] {
        let activities = create_activity_log(size);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("load", size), &activities, |b, activities| {
            b.iter(|| calculator.load(black_box(activities), 7, today));
        });
        group.bench_with_input(
            BenchmarkId::new("daily_volumes", size),
            &activities,
            |b, activities| {
                b.iter(|| calculator.daily_volumes(black_box(activities), 30, today));
            },
        );
    }

    group.finish();
}

fn bench_cooldown(c: &mut Criterion) {
    let table = RecoveryTimeTable::empty(now());
    let activity = create_activity_log(1).remove(0);

    c.bench_function("cooldown_process_and_tick", |b| {
        b.iter(|| {
            let mut machine = CooldownStateMachine::new();
            machine.process(black_box(&activity), &table, now());
            for hour in 0..36 {
                machine.tick(now() + Duration::hours(hour));
            }
            machine.current_adjustment()
        });
    });
}

fn bench_metric_scoring(c: &mut Criterion) {
    let analyzer = MetricDeltaAnalyzer::new();
    let today = now().date_naive();
    let series = MetricSeries::from_points(
        MetricKind::Hrv,
        (1..=30).map(|d| (today - Duration::days(d), 45.0 + (d % 7) as f64)),
    );

    c.bench_function("hrv_score_30_days", |b| {
        b.iter(|| analyzer.score(black_box(&series), Some(52.0), today));
    });
}

criterion_group!(
    benches,
    bench_learner,
    bench_training_load,
    bench_cooldown,
    bench_metric_scoring
);
criterion_main!(benches);
