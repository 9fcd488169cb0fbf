//! System configuration parameters
//!
//! Compiled-in constants for the feeder plus the runtime-tunable
//! [`FeederConfig`], which is persisted to NVS and can be changed through
//! [`AppCommand`](crate::app::commands::AppCommand)s.

use serde::{Deserialize, Serialize};

use crate::schedule::ScheduledFeeding;
use crate::timesync::source::{HttpSchema, TimeSource};

// ---------------------------------------------------------------------------
// Mechanics
// ---------------------------------------------------------------------------

/// Full steps per output-shaft revolution of the 28BYJ-48 (64:1 gearbox).
pub const STEPS_PER_REVOLUTION: u32 = 2048;
/// Auger rotation dispensed per food portion (one full turn).
pub const STEPS_PER_PORTION: u32 = STEPS_PER_REVOLUTION;
/// Smallest portion count accepted anywhere (manual, scheduled, button).
pub const MIN_PORTIONS: u8 = 1;
/// Largest portion count accepted anywhere (manual, scheduled, button).
pub const MAX_PORTIONS: u8 = 10;
/// Stepper speed in steps per second.
pub const STEPPER_MAX_SPEED_SPS: u32 = 500;
/// Stepper ramp rate in steps per second squared.
pub const STEPPER_ACCELERATION_SPS2: u32 = 800;

// ---------------------------------------------------------------------------
// Task intervals (milliseconds)
// ---------------------------------------------------------------------------

pub const MOTOR_MAINTENANCE_INTERVAL_MS: u64 = 10;
pub const FEEDING_MONITOR_INTERVAL_MS: u64 = 100;
pub const SCHEDULE_MONITOR_INTERVAL_MS: u64 = 30_000;
pub const NETWORK_MONITOR_INTERVAL_MS: u64 = 10_000;
pub const TIME_SYNC_TASK_INTERVAL_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Schedule engine
// ---------------------------------------------------------------------------

/// Maximum number of entries in the schedule table.
pub const MAX_SCHEDULES: usize = 10;
/// Longest description kept for an entry (longer input is truncated).
pub const MAX_DESCRIPTION_LEN: usize = 49;
/// Half-width of the on-time trigger window (seconds).
pub const ON_TIME_WINDOW_SECS: i64 = 60;
pub const DEFAULT_TOLERANCE_MINUTES: u8 = 30;
pub const TOLERANCE_RANGE_MINUTES: core::ops::RangeInclusive<u8> = 1..=120;
pub const DEFAULT_MAX_RECOVERY_HOURS: u8 = 12;
pub const RECOVERY_RANGE_HOURS: core::ops::RangeInclusive<u8> = 1..=72;

/// Table seeded on first boot (or when the persisted table is unreadable).
pub fn default_schedule() -> heapless::Vec<ScheduledFeeding, MAX_SCHEDULES> {
    let mut table = heapless::Vec::new();
    for (hour, portions, label) in [
        (8, 2, "Morning feeding"),
        (12, 1, "Midday feeding"),
        (18, 2, "Evening feeding"),
    ] {
        // Capacity is 10; three entries always fit.
        let _ = table.push(ScheduledFeeding::new(hour, 0, 0, portions, label));
    }
    table
}

// ---------------------------------------------------------------------------
// Time synchronisation
// ---------------------------------------------------------------------------

/// Local time zone offset from UTC (Brasília, UTC-3, no DST).
pub const UTC_OFFSET_SECS: i32 = -3 * 3600;
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 12 * 60 * 60 * 1000;
pub const SYNC_INTERVAL_RANGE_MS: core::ops::RangeInclusive<u64> = 60_000..=7 * 24 * 60 * 60 * 1000;
/// Per-attempt deadline for an SNTP query.
pub const NTP_ATTEMPT_TIMEOUT_MS: u64 = 10_000;
/// How often an in-flight SNTP query is checked.
pub const NTP_POLL_INTERVAL_MS: u64 = 500;
/// Per-attempt deadline for an HTTP time request.
pub const HTTP_ATTEMPT_TIMEOUT_MS: u64 = 8_000;
/// Delay between network coming up and the first automatic sync.
pub const INITIAL_SYNC_DELAY_MS: u64 = 5_000;
/// Cadence of the idle `should_sync` evaluation.
pub const SYNC_CHECK_INTERVAL_MS: u64 = 60_000;
/// Back-off after a cycle in which every source failed.
pub const SYNC_RETRY_AFTER_FAILURE_MS: u64 = 5 * 60 * 1000;
/// Clock is rewritten only when it is off by more than this.
pub const CLOCK_ADJUST_THRESHOLD_SECS: i64 = 2;
/// Clock years below this are garbage (RTC lost power).
pub const CLOCK_VALID_YEAR: i32 = 2000;
/// Clock years below this are plausible but too old to trust.
pub const CLOCK_FRESH_YEAR: i32 = 2020;

/// Failover order for time sources. Protocols alternate so a blocked UDP
/// port does not stall the whole chain.
pub const TIME_SOURCES: &[TimeSource] = &[
    TimeSource::Ntp("time.google.com"),
    TimeSource::Http {
        host: "worldtimeapi.org",
        path: "/api/timezone/America/Sao_Paulo",
        schema: HttpSchema::WorldTimeApi,
    },
    TimeSource::Ntp("time.cloudflare.com"),
    TimeSource::Http {
        host: "worldclockapi.com",
        path: "/api/json/utc/now",
        schema: HttpSchema::WorldClockApi,
    },
    TimeSource::Ntp("pool.ntp.org"),
    TimeSource::Http {
        host: "timeapi.io",
        path: "/api/Time/current/zone?timeZone=America/Sao_Paulo",
        schema: HttpSchema::TimeApiIo,
    },
    TimeSource::Ntp("time.nist.gov"),
    TimeSource::Ntp("br.pool.ntp.org"),
    TimeSource::Ntp("south-america.pool.ntp.org"),
    TimeSource::Ntp("0.pool.ntp.org"),
];

// ---------------------------------------------------------------------------
// Status / manual control
// ---------------------------------------------------------------------------

/// Minimum time the cancel acknowledgement stays on the status LED.
pub const CANCEL_PULSE_MS: u64 = 300;
/// Hold time for a button long press (manual feed).
pub const BUTTON_LONG_PRESS_MS: u32 = 1_000;
pub const DEFAULT_BUTTON_PORTIONS: u8 = 2;

/// Quiet period after the last runtime change before the config is flushed.
pub const CONFIG_SAVE_DEBOUNCE_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// NVS layout
// ---------------------------------------------------------------------------

pub const NVS_NS_SCHEDULE: &str = "feed_sched";
pub const NVS_KEY_SCHEDULE_COUNT: &str = "count";
pub const NVS_KEY_SCHEDULE_ENABLED: &str = "enabled";
pub const NVS_KEY_LAST_FEEDING: &str = "last_feed";
pub const NVS_NS_TIME_SYNC: &str = "time_sync";
pub const NVS_KEY_LAST_SYNC: &str = "last_sync";

/// Runtime-tunable configuration, persisted as a postcard blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederConfig {
    // --- Schedule ---
    /// How late (minutes) a missed feeding may still be recovered.
    pub tolerance_minutes: u8,
    /// Look-back horizon (hours) for missed-feeding recovery.
    pub max_recovery_hours: u8,

    // --- Time sync ---
    /// Minimum time between successful syncs.
    pub sync_interval_ms: u64,
    /// Offset applied to UTC sources to obtain local time.
    pub utc_offset_secs: i32,

    // --- Dispensing ---
    pub steps_per_portion: u32,
    /// Portions dispensed by a button long press.
    pub button_portions: u8,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            max_recovery_hours: DEFAULT_MAX_RECOVERY_HOURS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            utc_offset_secs: UTC_OFFSET_SECS,
            steps_per_portion: STEPS_PER_PORTION,
            button_portions: DEFAULT_BUTTON_PORTIONS,
        }
    }
}

/// `true` when `portions` is inside the single accepted range.
pub fn portions_valid(portions: u8) -> bool {
    (MIN_PORTIONS..=MAX_PORTIONS).contains(&portions)
}
