//! Service-level flows: manual feeding, cancellation and the status LED,
//! and state surviving a restart.

use fishfeeder::app::commands::{AppCommand, CommandResponse};
use fishfeeder::app::events::AppEvent;
use fishfeeder::app::ports::ConfigPort;
use fishfeeder::arbiter::FeedSource;
use fishfeeder::error::{Error, FeedError};
use fishfeeder::schedule::ScheduledFeeding;
use fishfeeder::scheduler::TaskId;
use fishfeeder::status::SystemStatus;

use crate::mock_hw::{at, Bench, MockMotor};

fn online_at_nine() -> Bench {
    let mut bench = Bench::at(at(2024, 3, 1, 9, 0, 0));
    bench.network.connected = true;
    bench
}

// ── Feeding and cancel ────────────────────────────────────────

#[test]
fn feed_now_runs_to_completion() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::default());
    bench.tick(&mut svc);

    let resp = svc.handle_command(AppCommand::FeedNow { portions: 2 }, 0, &mut bench.ports());
    let CommandResponse::Feeding(ticket) = resp else {
        panic!("expected feeding, got {:?}", resp);
    };
    assert_eq!((ticket.portions, ticket.steps, ticket.source), (2, 4_096, FeedSource::Manual));
    assert!(svc.is_task_enabled(TaskId::FeedingMonitor));

    bench.run_for(&mut svc, 500, 10);

    assert!(!svc.is_feeding());
    assert!(!svc.is_task_enabled(TaskId::FeedingMonitor));
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::FeedingCompleted { .. })), 1);
    assert_eq!(svc.arbiter().counters(), (1, 0));
    assert_eq!(svc.status(), SystemStatus::Ready);
}

#[test]
fn cancel_stops_motor_and_pulses_status() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::with_rate(20));
    bench.tick(&mut svc);
    assert_eq!(svc.status(), SystemStatus::Ready);

    svc.handle_command(AppCommand::FeedNow { portions: 3 }, 0, &mut bench.ports());
    bench.run_for(&mut svc, 500, 10);
    assert!(svc.is_feeding());
    assert_eq!(svc.status(), SystemStatus::Feeding);

    let resp = svc.handle_command(AppCommand::CancelFeeding, 500, &mut bench.ports());
    assert_eq!(resp, CommandResponse::Ok);
    assert!(!svc.is_feeding());
    assert_eq!(svc.arbiter().actuator().stops, 1);
    assert_eq!(svc.status(), SystemStatus::CancelPulse);

    // The pulse holds for its full duration, then the derived status returns.
    bench.run_for(&mut svc, 200, 10);
    assert_eq!(svc.status(), SystemStatus::CancelPulse);
    bench.run_for(&mut svc, 100, 10);
    assert_eq!(svc.status(), SystemStatus::Ready);

    assert_eq!(
        bench.indicator.shown,
        vec![
            SystemStatus::Booting,
            SystemStatus::Ready,
            SystemStatus::Feeding,
            SystemStatus::CancelPulse,
            SystemStatus::Ready
        ]
    );
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::FeedingCancelled)), 1);
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::FeedingCompleted { .. })), 0);
}

#[test]
fn second_request_is_refused_while_feeding() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::with_rate(1));
    svc.handle_command(AppCommand::FeedNow { portions: 1 }, 0, &mut bench.ports());

    let resp = svc.handle_command(AppCommand::FeedNow { portions: 1 }, 10, &mut bench.ports());

    assert_eq!(resp, CommandResponse::Rejected(Error::Feed(FeedError::AlreadyFeeding)));
    assert_eq!(svc.arbiter().actuator().moves.len(), 1);
}

#[test]
fn out_of_range_portions_are_refused() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::default());

    for portions in [0, 11] {
        let resp = svc.handle_command(AppCommand::FeedNow { portions }, 0, &mut bench.ports());
        assert_eq!(resp, CommandResponse::Rejected(Error::Feed(FeedError::InvalidPortions(portions))));
    }
    assert!(svc.arbiter().actuator().moves.is_empty());
    assert_eq!(svc.schedule().last_completed(), None);
}

#[test]
fn dead_motor_shows_error_and_refuses_feeding() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::broken());
    bench.tick(&mut svc);

    assert_eq!(svc.status(), SystemStatus::Error);
    let resp = svc.handle_command(AppCommand::FeedNow { portions: 1 }, 0, &mut bench.ports());
    assert_eq!(resp, CommandResponse::Rejected(Error::Feed(FeedError::ActuatorNotReady)));
}

#[test]
fn offline_device_shows_network_connecting() {
    let mut bench = Bench::at(at(2024, 3, 1, 9, 0, 0));
    let mut svc = bench.boot(MockMotor::default());
    assert_eq!(svc.status(), SystemStatus::Booting);

    bench.tick(&mut svc);
    assert_eq!(svc.status(), SystemStatus::NetworkConnecting);
    assert!(bench.sink.events.contains(&AppEvent::StatusChanged(SystemStatus::NetworkConnecting)));
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn schedule_and_last_feeding_survive_restart() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::default());
    {
        let mut io = bench.ports();
        let night = ScheduledFeeding::new(21, 30, 0, 3, "night");
        assert!(svc.handle_command(AppCommand::AddSchedule(night), 0, &mut io).is_ok());
        assert!(svc.handle_command(AppCommand::SetEntryEnabled { index: 0, enabled: false }, 0, &mut io).is_ok());
        assert!(svc.handle_command(AppCommand::FeedNow { portions: 1 }, 0, &mut io).is_ok());
    }
    let entries = svc.schedule().entries().to_vec();
    let last = svc.schedule().last_completed();
    drop(svc);

    let svc = bench.boot(MockMotor::default());

    assert_eq!(svc.schedule().entries(), &entries[..]);
    assert_eq!(svc.schedule().count(), 4);
    assert!(!svc.schedule().is_entry_enabled(0));
    assert_eq!(svc.schedule().last_completed(), last);
    assert_eq!(last, Some(at(2024, 3, 1, 9, 0, 0)));
}

#[test]
fn schedule_switch_survives_restart() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::default());
    svc.handle_command(AppCommand::SetScheduleEnabled(false), 0, &mut bench.ports());
    drop(svc);

    let svc = bench.boot(MockMotor::default());
    assert!(!svc.schedule().is_enabled());
}

#[test]
fn tuned_settings_are_saved_after_debounce_and_reloaded() {
    let mut bench = online_at_nine();
    let mut svc = bench.boot(MockMotor::default());
    {
        let mut io = bench.ports();
        assert!(svc.handle_command(AppCommand::SetTolerance(45), 1_000, &mut io).is_ok());
        assert!(svc.handle_command(AppCommand::SetMaxRecoveryHours(6), 1_500, &mut io).is_ok());
    }

    assert!(!svc.auto_save_if_needed(3_000, &bench.nvs));
    assert!(svc.auto_save_if_needed(6_000, &bench.nvs));
    assert!(!svc.is_config_dirty());
    drop(svc);

    let config = bench.nvs.load().unwrap();
    assert_eq!((config.tolerance_minutes, config.max_recovery_hours), (45, 6));
    let svc = bench.boot_with(config, MockMotor::default());
    assert_eq!(svc.schedule().tolerance_minutes(), 45);
    assert_eq!(svc.schedule().max_recovery_hours(), 6);
}

#[test]
fn first_boot_seeds_the_factory_schedule() {
    let mut bench = online_at_nine();
    let svc = bench.boot(MockMotor::default());

    let times: Vec<_> = svc.schedule().entries().iter().map(|e| (e.hour, e.minute, e.portions)).collect();
    assert_eq!(times, vec![(8, 0, 2), (12, 0, 1), (18, 0, 2)]);
    assert_eq!(svc.schedule().next_occurrence().unwrap().at, at(2024, 3, 1, 12, 0, 0));
}
