//! Time sync through the service: mixed NTP/HTTP failover, UTC offset
//! handling, power-save bracketing and link loss mid-cycle.

use chrono::Timelike;

use fishfeeder::app::commands::{AppCommand, CommandResponse};
use fishfeeder::app::events::AppEvent;
use fishfeeder::app::ports::TransportError;
use fishfeeder::config::TIME_SOURCES;
use fishfeeder::error::Error;
use fishfeeder::status::SystemStatus;
use fishfeeder::timesync::source::TimeSource;
use fishfeeder::timesync::SyncState;

use crate::mock_hw::{at, Bench, MockMotor, Reply};

/// 2024-01-15T13:30:00Z
const NTP_EPOCH: i64 = 1_705_325_400;

fn online_bench() -> Bench {
    // Battery-reset RTC: 2016 is valid for scheduling but stale.
    let mut bench = Bench::at(at(2016, 6, 1, 10, 0, 0));
    bench.network.connected = true;
    bench.network.power_save = true;
    bench
}

fn synced_sources(bench: &Bench) -> Vec<TimeSource> {
    bench
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::TimeSynced { source, .. } => Some(*source),
            _ => None,
        })
        .collect()
}

#[test]
fn stale_clock_fails_over_from_silent_ntp_to_http() {
    let mut bench = online_bench();
    bench.http.script.insert(
        "worldtimeapi.org",
        Reply::Answer(br#"{"datetime":"2024-01-15T10:30:45.123456-03:00"}"#.to_vec()),
    );
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 20_000, 10);

    assert_eq!(bench.ntp.begins, vec!["time.google.com".to_string()]);
    assert_eq!(bench.http.begins[0].0, "worldtimeapi.org");
    assert_eq!(synced_sources(&bench), vec![TIME_SOURCES[1]]);
    assert_eq!(bench.clock.adjusted.len(), 1);
    assert_eq!(bench.clock.adjusted[0].with_nanosecond(0).unwrap(), at(2024, 1, 15, 10, 30, 45));
    assert_eq!(svc.timesync().stats().successes, 1);
    assert_eq!(svc.timesync().state(), SyncState::Idle);
}

#[test]
fn ntp_reading_gets_utc_offset() {
    let mut bench = online_bench();
    bench.ntp.script.insert("time.google.com", Reply::Answer(NTP_EPOCH));
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 7_000, 10);

    assert_eq!(synced_sources(&bench), vec![TimeSource::Ntp("time.google.com")]);
    assert_eq!(bench.clock.adjusted, vec![at(2024, 1, 15, 10, 30, 0)]);
    assert!(bench.http.begins.is_empty());
}

#[test]
fn failover_walks_the_mixed_list_in_order() {
    let mut bench = online_bench();
    bench.ntp.script.insert("time.google.com", Reply::Refuse(TransportError::Dns));
    bench.http.script.insert("worldtimeapi.org", Reply::Fail(TransportError::Status(503)));
    bench.ntp.script.insert("time.cloudflare.com", Reply::Refuse(TransportError::Dns));
    bench.http.script.insert(
        "worldclockapi.com",
        Reply::Answer(br#"{"$id":"1","currentDateTime":"2024-01-15T13:30Z"}"#.to_vec()),
    );
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 8_000, 10);

    assert_eq!(bench.ntp.begins, vec!["time.google.com".to_string(), "time.cloudflare.com".to_string()]);
    let hosts: Vec<_> = bench.http.begins.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hosts, vec!["worldtimeapi.org", "worldclockapi.com"]);
    // UTC reading shifted to local time.
    assert_eq!(bench.clock.adjusted, vec![at(2024, 1, 15, 10, 30, 0)]);
    assert_eq!(synced_sources(&bench), vec![TIME_SOURCES[3]]);
}

#[test]
fn every_source_failing_reports_one_failure() {
    let mut bench = online_bench();
    for source in TIME_SOURCES {
        match source {
            TimeSource::Ntp(host) => {
                bench.ntp.script.insert(*host, Reply::Refuse(TransportError::Connect));
            }
            TimeSource::Http { host, .. } => {
                bench.http.script.insert(*host, Reply::Fail(TransportError::Status(500)));
            }
        }
    }
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 15_000, 10);

    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::TimeSyncFailed)), 1);
    assert_eq!(svc.timesync().stats().failures, 1);
    assert!(bench.clock.adjusted.is_empty());
    assert_eq!(bench.network.power_save_log, vec![false, true]);
    assert!(!svc.timesync().is_sync_in_progress());
}

#[test]
fn power_save_is_suspended_only_during_the_cycle() {
    let mut bench = online_bench();
    bench.ntp.script.insert("time.google.com", Reply::Answer(NTP_EPOCH));
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 5_200, 10);
    assert!(svc.timesync().is_sync_in_progress());
    assert!(!bench.network.power_save);
    assert_eq!(svc.status(), SystemStatus::TimeSyncing);

    bench.run_for(&mut svc, 1_000, 10);
    assert!(!svc.timesync().is_sync_in_progress());
    assert!(bench.network.power_save);
    assert_eq!(bench.network.power_save_log, vec![false, true]);
    assert_eq!(svc.status(), SystemStatus::Ready);
}

#[test]
fn clock_write_failure_fails_the_cycle() {
    let mut bench = online_bench();
    bench.clock.fail_writes = true;
    bench.ntp.script.insert("time.google.com", Reply::Answer(NTP_EPOCH));
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 7_000, 10);

    assert!(synced_sources(&bench).is_empty());
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::TimeSyncFailed)), 1);
    assert_eq!(svc.timesync().stats().successes, 0);
}

#[test]
fn fresh_clock_within_interval_is_left_alone() {
    let mut bench = online_bench();
    bench.ntp.script.insert("time.google.com", Reply::Answer(NTP_EPOCH));
    let mut svc = bench.boot(MockMotor::default());
    bench.run_for(&mut svc, 7_000, 10);
    assert_eq!(svc.timesync().stats().attempts, 1);

    // Next periodic check finds the last sync minutes old.
    bench.run_for(&mut svc, 120_000, 100);
    assert_eq!(svc.timesync().stats().attempts, 1);
}

#[test]
fn link_loss_aborts_the_running_cycle() {
    let mut bench = online_bench();
    let mut svc = bench.boot(MockMotor::default());

    bench.run_for(&mut svc, 6_000, 10);
    assert!(svc.timesync().is_sync_in_progress());

    bench.network.connected = false;
    bench.run_for(&mut svc, 5_000, 10);

    assert!(!svc.timesync().is_sync_in_progress());
    assert_eq!(bench.sink.count(|e| matches!(e, AppEvent::TimeSyncFailed)), 1);
    assert!(bench.ntp.cancels >= 1);
    assert!(bench.network.power_save);
    assert_eq!(svc.status(), SystemStatus::NetworkConnecting);
}

#[test]
fn forced_sync_is_refused_while_one_is_running() {
    let mut bench = online_bench();
    let mut svc = bench.boot(MockMotor::default());
    bench.run_for(&mut svc, 6_000, 10);

    let now_ms = bench.uptime_ms;
    let resp = svc.handle_command(AppCommand::ForceTimeSync, now_ms, &mut bench.ports());
    assert!(matches!(resp, CommandResponse::Rejected(Error::Busy(_))));
}

#[test]
fn forced_sync_skips_the_initial_delay() {
    let mut bench = online_bench();
    bench.ntp.script.insert("time.google.com", Reply::Answer(NTP_EPOCH));
    let mut svc = bench.boot(MockMotor::default());
    bench.tick(&mut svc);

    let resp = svc.handle_command(AppCommand::ForceTimeSync, 0, &mut bench.ports());
    assert_eq!(resp, CommandResponse::Ok);
    bench.run_for(&mut svc, 1_000, 10);

    assert_eq!(synced_sources(&bench).len(), 1);
}
