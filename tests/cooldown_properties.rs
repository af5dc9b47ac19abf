//! Property tests for the cooldown state machine and the load calculator

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use recoveryrs::history::RecoveryTimeTable;
use recoveryrs::models::{Activity, ActivityType, Intensity};
use recoveryrs::training_load::TrainingLoadCalculator;
use recoveryrs::CooldownStateMachine;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap()
}

fn intensity_strategy() -> impl Strategy<Value = Intensity> {
    prop_oneof![
        Just(Intensity::Low),
        Just(Intensity::Moderate),
        Just(Intensity::High),
    ]
}

fn activity_type_strategy() -> impl Strategy<Value = ActivityType> {
    prop_oneof![
        Just(ActivityType::Run),
        Just(ActivityType::Ride),
        Just(ActivityType::Swim),
        Just(ActivityType::Walk),
        Just(ActivityType::Workout),
        Just(ActivityType::Other),
    ]
}

fn activity(
    id: &str,
    activity_type: ActivityType,
    intensity: Intensity,
    duration_seconds: i64,
) -> Activity {
    Activity {
        id: id.to_string(),
        activity_type,
        start_time: t0() - Duration::seconds(duration_seconds.max(0)),
        duration_seconds,
        distance_meters: None,
        intensity,
        source: None,
    }
}

proptest! {
    #[test]
    fn tick_is_monotonic_until_reset(
        activity_type in activity_type_strategy(),
        intensity in intensity_strategy(),
        duration_seconds in 60i64..(4 * 3600),
        mut offsets in prop::collection::vec(0i64..(60 * 3600), 1..20),
    ) {
        let mut machine = CooldownStateMachine::new();
        let table = RecoveryTimeTable::empty(t0());
        let run = activity("a", activity_type, intensity, duration_seconds);

        let mut previous = machine.process(&run, &table, t0());
        offsets.sort_unstable();
        for offset in offsets {
            let adjustment = machine.tick(t0() + Duration::seconds(offset));
            prop_assert!(adjustment <= 100);
            prop_assert!(adjustment >= previous);
            previous = adjustment;
        }
    }

    #[test]
    fn tick_is_pure_for_fixed_time(
        intensity in intensity_strategy(),
        duration_seconds in 60i64..(4 * 3600),
        offset in 0i64..(60 * 3600),
    ) {
        let mut machine = CooldownStateMachine::new();
        let table = RecoveryTimeTable::empty(t0());
        machine.process(&activity("a", ActivityType::Ride, intensity, duration_seconds), &table, t0());

        let now = t0() + Duration::seconds(offset);
        let first = machine.tick(now);
        let state = machine.state().clone();
        let second = machine.tick(now);

        prop_assert_eq!(first, second);
        prop_assert_eq!(&state, machine.state());
    }

    #[test]
    fn reprocessing_is_a_no_op(
        intensity in intensity_strategy(),
        duration_seconds in -600i64..(6 * 3600),
        offset in 0i64..(24 * 3600),
    ) {
        let mut machine = CooldownStateMachine::new();
        let table = RecoveryTimeTable::empty(t0());
        let run = activity("dup", ActivityType::Run, intensity, duration_seconds);

        machine.process(&run, &table, t0());
        let before = machine.state().clone();
        machine.process(&run, &table, t0() + Duration::seconds(offset));

        prop_assert_eq!(&before, machine.state());
    }

    #[test]
    fn load_is_never_negative(
        durations in prop::collection::vec(-3600i64..(5 * 3600), 0..15),
        days_ago in prop::collection::vec(0i64..14, 15),
    ) {
        let calculator = TrainingLoadCalculator::new();
        let today = NaiveDate::from_ymd_opt(2024, 9, 23).unwrap();
        let activities: Vec<Activity> = durations
            .iter()
            .zip(days_ago.iter())
            .enumerate()
            .map(|(i, (&duration, &days))| Activity {
                id: i.to_string(),
                activity_type: ActivityType::Run,
                start_time: t0() - Duration::days(days),
                duration_seconds: duration,
                distance_meters: None,
                intensity: Intensity::Moderate,
                source: None,
            })
            .collect();

        prop_assert!(calculator.load(&activities, 7, today) >= 0);

        let ratio = calculator.work_rest_ratio_for(&activities, today);
        prop_assert!(ratio.active_days + ratio.rest_days <= 7);
    }
}
