//! Time synchronisation engine.
//!
//! Keeps the RTC honest by walking a prioritised list of mixed NTP/HTTP
//! sources:
//!
//! ```text
//!  Idle ──(network up ∧ should_sync)──▶ Configuring(0) ──▶ WaitingResponse
//!    ▲                                        ▲                 │
//!    │                                        └── timeout/fail ─┤ (next source)
//!    │                                                          │
//!    ├───────────────────── success ◀───────────────────────────┤
//!    └───────────────────── Failed ◀──── all sources exhausted ─┘
//! ```
//!
//! A failing source is never retried within a cycle; the engine moves to
//! the next entry, so a blocked UDP port only costs one NTP timeout before
//! an HTTP source is tried. Radio power save is suspended for the cycle
//! and restored on every exit path.

pub mod attempt;
pub mod providers;
pub mod source;

use chrono::{Datelike, NaiveDateTime};
use log::{debug, info, warn};

use crate::app::ports::{
    read_i64, write_i64, ClockPort, ConfigError, HttpTransport, NetworkPort, NtpTransport, StorageError, StoragePort,
};
use crate::config::{
    FeederConfig, CLOCK_ADJUST_THRESHOLD_SECS, CLOCK_FRESH_YEAR, CLOCK_VALID_YEAR, INITIAL_SYNC_DELAY_MS,
    NVS_KEY_LAST_SYNC, NVS_NS_TIME_SYNC, SYNC_CHECK_INTERVAL_MS, SYNC_INTERVAL_RANGE_MS,
    SYNC_RETRY_AFTER_FAILURE_MS,
};

use attempt::{Attempt, AttemptPoll};
use source::TimeSource;

/// Ports the engine drives during a tick.
pub struct SyncPorts<'a> {
    pub clock: &'a mut dyn ClockPort,
    pub network: &'a mut dyn NetworkPort,
    pub ntp: &'a mut dyn NtpTransport,
    pub http: &'a mut dyn HttpTransport,
    pub storage: &'a mut dyn StoragePort,
}

/// Externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Query opened against `server`, not yet polled.
    Configuring { server: usize },
    /// Waiting for `server` to answer.
    WaitingResponse { server: usize },
}

/// Running counters, read-only to collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles started.
    pub attempts: u32,
    pub successes: u32,
    /// Cycles in which every source failed or the link dropped.
    pub failures: u32,
    /// Uptime (ms) of the last success in this boot.
    pub last_success_ms: Option<u64>,
    /// Local time written at the last success, persisted across boots.
    pub last_sync: Option<NaiveDateTime>,
    pub current_server: usize,
}

/// Result of a finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced {
        source: TimeSource,
        /// Corrected minus previous clock value, in seconds. `None` when
        /// the clock could not be read before the write.
        delta_secs: Option<i64>,
        adjusted: bool,
    },
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Waiting { server: usize, attempt: Attempt },
}

pub struct TimeSyncEngine {
    sources: &'static [TimeSource],
    phase: Phase,
    interval_ms: u64,
    utc_offset_secs: i32,
    initialized: bool,
    network_up: bool,
    /// Earliest uptime for the next automatic `should_sync` check.
    not_before_ms: u64,
    /// Power-save setting to restore when the cycle ends.
    saved_power_save: Option<bool>,
    stats: SyncStats,
}

impl TimeSyncEngine {
    pub fn new(sources: &'static [TimeSource], config: &FeederConfig) -> Self {
        Self {
            sources,
            phase: Phase::Idle,
            interval_ms: config.sync_interval_ms,
            utc_offset_secs: config.utc_offset_secs,
            initialized: false,
            network_up: false,
            not_before_ms: 0,
            saved_power_save: None,
            stats: SyncStats::default(),
        }
    }

    /// Restore the persisted last-sync timestamp.
    pub fn begin(&mut self, storage: &dyn StoragePort) {
        match read_i64(storage, NVS_NS_TIME_SYNC, NVS_KEY_LAST_SYNC) {
            Ok(secs) => {
                self.stats.last_sync = chrono::DateTime::from_timestamp(secs, 0).map(|d| d.naive_utc());
            }
            Err(StorageError::NotFound) => info!("timesync: no previous sync recorded"),
            Err(e) => warn!("timesync: could not read last sync: {}", e),
        }
        self.initialized = true;
        info!(
            "timesync: {} sources, interval {} min",
            self.sources.len(),
            self.interval_ms / 60_000
        );
    }

    // ── Decision ──────────────────────────────────────────────

    /// Whether the clock needs a fresh sync. An unreadable clock does.
    pub fn should_sync(&self, clock_now: Option<NaiveDateTime>) -> bool {
        let Some(now) = clock_now else {
            return true;
        };
        if now.year() < CLOCK_VALID_YEAR {
            debug!("timesync: clock invalid ({})", now);
            return true;
        }
        if now.year() < CLOCK_FRESH_YEAR {
            debug!("timesync: clock outdated ({})", now);
            return true;
        }
        let Some(last) = self.stats.last_sync else {
            return true;
        };
        if now < last {
            debug!("timesync: clock is behind last sync ({} < {})", now, last);
            return true;
        }
        (now - last).num_milliseconds() >= self.interval_ms as i64
    }

    // ── Driving ───────────────────────────────────────────────

    /// Link edge from the network monitor. A drop aborts a running cycle.
    pub fn on_network_change(&mut self, up: bool, now_ms: u64, io: &mut SyncPorts<'_>) -> Option<SyncOutcome> {
        if up == self.network_up {
            return None;
        }
        self.network_up = up;
        if up {
            info!("timesync: network up, first check in {} ms", INITIAL_SYNC_DELAY_MS);
            self.not_before_ms = now_ms + INITIAL_SYNC_DELAY_MS;
            None
        } else if let Phase::Waiting { attempt, .. } = self.phase {
            warn!("timesync: network lost during sync");
            attempt.cancel(io.ntp, io.http);
            Some(self.fail_cycle(now_ms, io))
        } else {
            None
        }
    }

    /// Start a cycle now, bypassing `should_sync` and back-off. Returns
    /// `false` if a cycle is already running or the network is down.
    pub fn force_sync_now(&mut self, now_ms: u64, io: &mut SyncPorts<'_>) -> bool {
        if self.is_sync_in_progress() {
            info!("timesync: sync already in progress");
            return false;
        }
        if !io.network.is_connected() {
            warn!("timesync: cannot sync, network not connected");
            return false;
        }
        self.network_up = true;
        info!("timesync: manual sync requested");
        self.start_cycle(now_ms, io);
        true
    }

    /// Advance the state machine. Called from the time-sync task.
    pub fn tick(&mut self, now_ms: u64, io: &mut SyncPorts<'_>) -> Option<SyncOutcome> {
        match self.phase {
            Phase::Idle => {
                if !self.initialized || !self.network_up || now_ms < self.not_before_ms {
                    return None;
                }
                self.not_before_ms = now_ms + SYNC_CHECK_INTERVAL_MS;
                if self.should_sync(io.clock.now().ok()) {
                    self.start_cycle(now_ms, io)
                } else {
                    None
                }
            }
            Phase::Waiting { server, mut attempt } => {
                let polled = attempt.poll(now_ms, io.ntp, io.http);
                self.phase = Phase::Waiting { server, attempt };
                match polled {
                    AttemptPoll::Pending => None,
                    AttemptPoll::Done(reading) => match reading.to_local(self.utc_offset_secs) {
                        Some(local) => Some(self.complete(server, local, now_ms, io)),
                        None => {
                            warn!("timesync: {} reading out of range", self.sources[server].host());
                            self.launch(server + 1, now_ms, io)
                        }
                    },
                    AttemptPoll::TimedOut => {
                        warn!("timesync: {} timed out", self.sources[server].host());
                        attempt.cancel(io.ntp, io.http);
                        self.launch(server + 1, now_ms, io)
                    }
                    AttemptPoll::Failed(e) => {
                        warn!("timesync: {} failed: {}", self.sources[server].host(), e);
                        attempt.cancel(io.ntp, io.http);
                        self.launch(server + 1, now_ms, io)
                    }
                }
            }
        }
    }

    fn start_cycle(&mut self, now_ms: u64, io: &mut SyncPorts<'_>) -> Option<SyncOutcome> {
        self.stats.attempts = self.stats.attempts.wrapping_add(1);
        let power_save = io.network.power_save_enabled();
        self.saved_power_save = Some(power_save);
        if power_save {
            debug!("timesync: suspending radio power save");
            io.network.set_power_save(false);
        }
        info!("timesync: cycle {} started", self.stats.attempts);
        self.launch(0, now_ms, io)
    }

    /// Open a query against the first usable source at or after `from`.
    fn launch(&mut self, from: usize, now_ms: u64, io: &mut SyncPorts<'_>) -> Option<SyncOutcome> {
        for server in from..self.sources.len() {
            self.stats.current_server = server;
            let source = self.sources[server];
            match Attempt::start(source, now_ms, io.ntp, io.http) {
                Ok(attempt) => {
                    info!("timesync: trying {} {} ({}/{})", source.protocol(), source.host(), server + 1, self.sources.len());
                    self.phase = Phase::Waiting { server, attempt };
                    return None;
                }
                Err(e) => warn!("timesync: {} unavailable: {}", source.host(), e),
            }
        }
        Some(self.fail_cycle(now_ms, io))
    }

    fn complete(
        &mut self,
        server: usize,
        corrected: NaiveDateTime,
        now_ms: u64,
        io: &mut SyncPorts<'_>,
    ) -> SyncOutcome {
        let source = self.sources[server];
        let delta_secs = match io.clock.now() {
            Ok(current) => Some((corrected - current).num_seconds()),
            Err(e) => {
                warn!("timesync: clock unreadable before adjust: {}", e);
                None
            }
        };

        let adjusted = delta_secs.is_none_or(|d| d.abs() > CLOCK_ADJUST_THRESHOLD_SECS);
        if adjusted {
            if let Err(e) = io.clock.adjust(corrected) {
                warn!("timesync: RTC write failed: {}", e);
                return self.fail_cycle(now_ms, io);
            }
            match delta_secs {
                Some(d) => info!("timesync: clock set to {} from {} (delta {} s)", corrected, source.host(), d),
                None => info!("timesync: clock set to {} from {}", corrected, source.host()),
            }
        } else {
            info!("timesync: clock within {} s of {}, left as is", CLOCK_ADJUST_THRESHOLD_SECS, source.host());
        }

        self.stats.last_sync = Some(corrected);
        if let Err(e) = write_i64(io.storage, NVS_NS_TIME_SYNC, NVS_KEY_LAST_SYNC, corrected.and_utc().timestamp()) {
            warn!("timesync: failed to persist last sync: {}", e);
        }
        self.stats.successes = self.stats.successes.wrapping_add(1);
        self.stats.last_success_ms = Some(now_ms);
        self.finish_cycle(now_ms + SYNC_CHECK_INTERVAL_MS, io);
        SyncOutcome::Synced { source, delta_secs: if adjusted { delta_secs } else { Some(0) }, adjusted }
    }

    fn fail_cycle(&mut self, now_ms: u64, io: &mut SyncPorts<'_>) -> SyncOutcome {
        self.stats.failures = self.stats.failures.wrapping_add(1);
        warn!(
            "timesync: cycle failed, retrying in {} s",
            SYNC_RETRY_AFTER_FAILURE_MS / 1000
        );
        self.finish_cycle(now_ms + SYNC_RETRY_AFTER_FAILURE_MS, io);
        SyncOutcome::Failed
    }

    fn finish_cycle(&mut self, next_check_ms: u64, io: &mut SyncPorts<'_>) {
        self.phase = Phase::Idle;
        self.stats.current_server = 0;
        self.not_before_ms = next_check_ms;
        if let Some(true) = self.saved_power_save.take() {
            debug!("timesync: restoring radio power save");
            io.network.set_power_save(true);
        }
    }

    // ── Settings & queries ────────────────────────────────────

    pub fn set_sync_interval(&mut self, interval_ms: u64) -> Result<(), ConfigError> {
        if !SYNC_INTERVAL_RANGE_MS.contains(&interval_ms) {
            return Err(ConfigError::ValidationFailed("sync_interval_ms out of range"));
        }
        self.interval_ms = interval_ms;
        info!("timesync: interval set to {} min", interval_ms / 60_000);
        Ok(())
    }

    pub fn sync_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_sync_in_progress(&self) -> bool {
        matches!(self.phase, Phase::Waiting { .. })
    }

    pub fn state(&self) -> SyncState {
        match self.phase {
            Phase::Idle => SyncState::Idle,
            Phase::Waiting { server, attempt } if !attempt.has_polled() => SyncState::Configuring { server },
            Phase::Waiting { server, .. } => SyncState::WaitingResponse { server },
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seconds since the last successful sync, by the wall clock.
    pub fn time_since_last_sync_secs(&self, now: NaiveDateTime) -> Option<i64> {
        self.stats.last_sync.map(|last| (now - last).num_seconds())
    }

    pub fn sources(&self) -> &'static [TimeSource] {
        self.sources
    }
}

/// `true` when the RTC holds a plausible date.
pub fn is_clock_valid(now: NaiveDateTime) -> bool {
    now.year() >= CLOCK_VALID_YEAR
}
