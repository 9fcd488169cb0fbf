//! Schedule engine driven through the full service: on-time triggers,
//! missed-feeding recovery after an outage, and the clock guard.

use chrono::NaiveDateTime;

use fishfeeder::app::commands::AppCommand;
use fishfeeder::app::events::AppEvent;
use fishfeeder::app::ports::write_i64;
use fishfeeder::arbiter::FeedSource;
use fishfeeder::config::{NVS_KEY_LAST_FEEDING, NVS_NS_SCHEDULE};
use fishfeeder::drivers::button::ButtonEvent;
use fishfeeder::error::FeedError;
use fishfeeder::schedule::ScheduledFeeding;

use crate::mock_hw::{at, Bench, MockMotor};

fn seed_last_feeding(bench: &mut Bench, last: NaiveDateTime) {
    write_i64(&mut bench.nvs, NVS_NS_SCHEDULE, NVS_KEY_LAST_FEEDING, last.and_utc().timestamp()).unwrap();
}

fn started_from(bench: &Bench, source: FeedSource) -> Vec<u8> {
    bench
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::FeedingStarted(t) if t.source == source => Some(t.portions),
            _ => None,
        })
        .collect()
}

// ── On time ───────────────────────────────────────────────────

#[test]
fn noon_meal_fires_on_time_and_moves_next_to_evening() {
    let mut bench = Bench::at(at(2024, 3, 1, 12, 0, 5));
    seed_last_feeding(&mut bench, at(2024, 2, 29, 18, 0, 0));
    let mut svc = bench.boot(MockMotor::default());

    bench.tick(&mut svc);

    assert_eq!(started_from(&bench, FeedSource::Scheduled), vec![1]);
    assert_eq!(svc.schedule().last_completed(), Some(at(2024, 3, 1, 12, 0, 5)));
    let next = svc.schedule().next_occurrence().unwrap();
    assert_eq!(next.at, at(2024, 3, 1, 18, 0, 0));
    assert_eq!(next.index, 2);
    assert_eq!(svc.arbiter().actuator().moves, vec![2_048]);
}

#[test]
fn on_time_meal_is_dispatched_once() {
    let mut bench = Bench::at(at(2024, 3, 1, 11, 59, 30));
    seed_last_feeding(&mut bench, at(2024, 3, 1, 8, 0, 0));
    let mut svc = bench.boot(MockMotor::default());

    // Several schedule passes fall inside the ±60 s window.
    bench.tick(&mut svc);
    bench.run_for(&mut svc, 120_000, 100);

    assert_eq!(started_from(&bench, FeedSource::Scheduled).len(), 1);
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::FeedingCompleted { .. })), 1);
    assert!(!svc.is_feeding());
}

#[test]
fn day_runs_through_all_three_meals() {
    let mut bench = Bench::at(at(2024, 3, 1, 7, 59, 0));
    seed_last_feeding(&mut bench, at(2024, 2, 29, 18, 0, 0));
    let mut svc = bench.boot(MockMotor::default());

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 11 * 3_600_000, 10_000);

    assert_eq!(started_from(&bench, FeedSource::Scheduled), vec![2, 1, 2]);
    assert!(started_from(&bench, FeedSource::Recovered).is_empty());
}

#[test]
fn disabled_entry_is_skipped() {
    let mut bench = Bench::at(at(2024, 3, 1, 11, 0, 0));
    let mut svc = bench.boot(MockMotor::default());
    let resp = svc.handle_command(AppCommand::SetEntryEnabled { index: 1, enabled: false }, 0, &mut bench.ports());
    assert!(resp.is_ok());

    bench.run_for(&mut svc, 2 * 3_600_000, 10_000);

    assert!(started_from(&bench, FeedSource::Scheduled).is_empty());
    assert_eq!(svc.schedule().next_occurrence().unwrap().at, at(2024, 3, 1, 18, 0, 0));
}

// ── Recovery ──────────────────────────────────────────────────

#[test]
fn outage_beyond_tolerance_is_not_recovered() {
    // Power back at 12:40; the 12:00 meal is 40 min old, tolerance is 30.
    let mut bench = Bench::at(at(2024, 3, 1, 12, 40, 0));
    seed_last_feeding(&mut bench, at(2024, 3, 1, 8, 0, 10));
    let mut svc = bench.boot(MockMotor::default());

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 10 * 60_000, 1_000);

    assert!(bench.sink.events.iter().all(|e| !matches!(e, AppEvent::FeedingStarted(_))));
    assert_eq!(svc.schedule().next_occurrence().unwrap().at, at(2024, 3, 1, 18, 0, 0));
}

#[test]
fn outage_within_tolerance_is_recovered_exactly_once() {
    // Power back at 12:20; the 12:00 meal is 20 min old.
    let mut bench = Bench::at(at(2024, 3, 1, 12, 20, 0));
    seed_last_feeding(&mut bench, at(2024, 3, 1, 8, 0, 10));
    let mut svc = bench.boot(MockMotor::default());

    bench.tick(&mut svc);
    assert_eq!(svc.schedule().last_completed(), Some(at(2024, 3, 1, 12, 20, 0)));

    bench.run_for(&mut svc, 10 * 60_000, 1_000);

    assert_eq!(started_from(&bench, FeedSource::Recovered), vec![1]);
    assert!(started_from(&bench, FeedSource::Scheduled).is_empty());
}

#[test]
fn several_missed_meals_recover_only_the_earliest() {
    let mut bench = Bench::at(at(2024, 3, 1, 12, 10, 0));
    seed_last_feeding(&mut bench, at(2024, 3, 1, 10, 0, 0));
    let mut svc = bench.boot(MockMotor::default());
    {
        let mut io = bench.ports();
        svc.handle_command(AppCommand::ClearSchedules, 0, &mut io);
        svc.handle_command(AppCommand::AddSchedule(ScheduledFeeding::new(11, 0, 0, 3, "late morning")), 0, &mut io);
        svc.handle_command(AppCommand::AddSchedule(ScheduledFeeding::new(11, 30, 0, 1, "snack")), 0, &mut io);
        svc.handle_command(AppCommand::SetTolerance(120), 0, &mut io);
    }

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 5 * 60_000, 1_000);

    assert_eq!(started_from(&bench, FeedSource::Recovered), vec![3]);
}

#[test]
fn recovery_ignores_meals_older_than_horizon() {
    // 08:00 is 110 min late, inside a 120 min tolerance, but the
    // look-back horizon is only one hour.
    let mut bench = Bench::at(at(2024, 3, 1, 9, 50, 0));
    let mut svc = bench.boot(MockMotor::default());
    {
        let mut io = bench.ports();
        svc.handle_command(AppCommand::SetTolerance(120), 0, &mut io);
        svc.handle_command(AppCommand::SetMaxRecoveryHours(1), 0, &mut io);
    }

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 60_000, 1_000);

    assert!(started_from(&bench, FeedSource::Recovered).is_empty());
    assert_eq!(svc.schedule().last_completed(), None);
}

// ── Manual feedings and guards ────────────────────────────────

#[test]
fn button_feed_just_before_a_meal_covers_it() {
    let mut bench = Bench::at(at(2024, 3, 1, 11, 59, 30));
    seed_last_feeding(&mut bench, at(2024, 3, 1, 8, 0, 0));
    let mut svc = bench.boot(MockMotor::default());

    svc.on_button(ButtonEvent::LongPress, 0, &mut bench.ports());
    bench.run_for(&mut svc, 5 * 60_000, 100);

    assert_eq!(started_from(&bench, FeedSource::Button), vec![2]);
    assert!(started_from(&bench, FeedSource::Scheduled).is_empty());
    assert!(started_from(&bench, FeedSource::Recovered).is_empty());
    assert_eq!(svc.arbiter().actuator().moves, vec![4_096]);
}

#[test]
fn refused_dispatch_still_counts_as_the_meal() {
    let mut bench = Bench::at(at(2024, 3, 1, 12, 0, 0));
    let mut svc = bench.boot(MockMotor::broken());

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 3 * 60_000, 1_000);

    let refusals: Vec<_> = bench
        .sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::FeedingRejected { .. }))
        .collect();
    assert_eq!(
        refusals,
        vec![&AppEvent::FeedingRejected { source: FeedSource::Scheduled, reason: FeedError::ActuatorNotReady }]
    );
    assert_eq!(svc.schedule().last_completed(), Some(at(2024, 3, 1, 12, 0, 0)));
}

#[test]
fn unset_clock_skips_schedule_processing() {
    let mut bench = Bench::at(at(1999, 12, 31, 12, 0, 5));
    let mut svc = bench.boot(MockMotor::default());

    bench.tick(&mut svc);
    bench.run_for(&mut svc, 2 * 60_000, 1_000);

    assert!(bench.sink.events.iter().all(|e| !matches!(e, AppEvent::FeedingStarted(_))));
    assert_eq!(svc.schedule().last_completed(), None);
}

#[test]
fn switched_off_schedule_never_feeds() {
    let mut bench = Bench::at(at(2024, 3, 1, 11, 59, 0));
    let mut svc = bench.boot(MockMotor::default());
    svc.handle_command(AppCommand::SetScheduleEnabled(false), 0, &mut bench.ports());

    bench.run_for(&mut svc, 5 * 60_000, 1_000);

    assert!(bench.sink.events.iter().all(|e| !matches!(e, AppEvent::FeedingStarted(_))));
}
