//! Feeding schedule engine.
//!
//! Owns the table of daily feedings and decides when to feed:
//!
//! - **On time**: an enabled entry whose nearest occurrence is within
//!   ±60 s of now and not yet covered by the last dispatched feeding.
//! - **Recovery** (checked first): after an outage, an occurrence between
//!   the last dispatched feeding and now that is more than 1 and at most
//!   `tolerance_minutes` minutes late, and no older than
//!   `max_recovery_hours`. At most one recovered feeding per tick.
//!
//! The engine never drives the motor itself; it hands the request to a
//! [`FeedGate`] and records the dispatch time immediately, whether or not
//! the motor later finishes.

pub mod table;

use chrono::{Duration, NaiveDateTime};
use heapless::Vec;
use log::{info, warn};

use crate::app::ports::{read_i64, write_i64, StorageError, StoragePort};
use crate::arbiter::{FeedGate, FeedSource, FeedTicket};
use crate::config::{
    default_schedule, DEFAULT_MAX_RECOVERY_HOURS, DEFAULT_TOLERANCE_MINUTES, MAX_SCHEDULES,
    NVS_KEY_LAST_FEEDING, NVS_KEY_SCHEDULE_ENABLED, NVS_NS_SCHEDULE, ON_TIME_WINDOW_SECS,
    RECOVERY_RANGE_HOURS, TOLERANCE_RANGE_MINUTES,
};
use crate::error::{FeedError, ScheduleError};

pub use table::{LoadError, ScheduledFeeding};

/// Cached next feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFeeding {
    pub at: NaiveDateTime,
    pub index: usize,
}

/// How an occurrence was picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    OnTime,
    Recovered { minutes_late: i64 },
}

/// Outcome of a processing tick that dispatched a feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub index: usize,
    pub occurrence: NaiveDateTime,
    pub trigger: Trigger,
    pub result: Result<FeedTicket, FeedError>,
}

pub struct FeedingScheduleEngine {
    table: Vec<ScheduledFeeding, MAX_SCHEDULES>,
    enabled: bool,
    last_completed: Option<NaiveDateTime>,
    next: Option<NextFeeding>,
    tolerance_minutes: u8,
    max_recovery_hours: u8,
}

impl FeedingScheduleEngine {
    /// Engine over an in-memory table, nothing persisted yet.
    pub fn new(table: Vec<ScheduledFeeding, MAX_SCHEDULES>) -> Self {
        Self {
            table,
            enabled: true,
            last_completed: None,
            next: None,
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            max_recovery_hours: DEFAULT_MAX_RECOVERY_HOURS,
        }
    }

    /// Restore table, switch and last feeding from storage. Seeds and
    /// persists the factory table when no usable table is stored.
    pub fn load(storage: &mut dyn StoragePort) -> Self {
        let table = match table::load_table(storage) {
            Ok(table) => {
                info!("schedule: loaded {} entr(ies) from NVS", table.len());
                table
            }
            Err(e) => {
                match e {
                    LoadError::Missing => info!("schedule: no stored table, seeding defaults"),
                    other => warn!("schedule: stored table unusable ({:?}), seeding defaults", other),
                }
                let table = default_schedule();
                if let Err(e) = table::save_table(storage, &table) {
                    warn!("schedule: failed to persist default table: {}", e);
                }
                table
            }
        };

        let mut engine = Self::new(table);

        let mut flag = [1u8; 1];
        match storage.read(NVS_NS_SCHEDULE, NVS_KEY_SCHEDULE_ENABLED, &mut flag) {
            Ok(_) | Err(StorageError::NotFound) => engine.enabled = flag[0] != 0,
            Err(e) => warn!("schedule: could not read enabled flag: {}", e),
        }

        match read_i64(storage, NVS_NS_SCHEDULE, NVS_KEY_LAST_FEEDING) {
            Ok(secs) => engine.last_completed = chrono::DateTime::from_timestamp(secs, 0).map(|d| d.naive_utc()),
            Err(StorageError::NotFound) => {}
            Err(e) => warn!("schedule: could not read last feeding: {}", e),
        }
        engine
    }

    // ── Processing ────────────────────────────────────────────

    /// One schedule-monitor tick. Dispatches at most one feeding.
    pub fn process(
        &mut self,
        now: NaiveDateTime,
        gate: &mut dyn FeedGate,
        storage: &mut dyn StoragePort,
    ) -> Option<Dispatched> {
        self.recompute_next(now);
        if !self.enabled || self.table.is_empty() || gate.is_feeding() {
            return None;
        }

        let (index, occurrence, trigger) = self
            .find_recoverable(now)
            .or_else(|| self.find_on_time(now).map(|(i, at)| (i, at, Trigger::OnTime)))?;

        let entry = &self.table[index];
        let source = match trigger {
            Trigger::OnTime => {
                info!(
                    "schedule: '{}' due at {} ({} portion(s))",
                    entry.description, occurrence, entry.portions
                );
                FeedSource::Scheduled
            }
            Trigger::Recovered { minutes_late } => {
                info!(
                    "schedule: recovering '{}' missed at {} ({} min late)",
                    entry.description, occurrence, minutes_late
                );
                FeedSource::Recovered
            }
        };
        let result = gate.dispatch(entry.portions, source);
        if let Err(e) = result {
            warn!("schedule: dispatch of entry {} refused: {}", index, e);
        }

        self.record_feeding(now, storage);
        self.recompute_next(now);
        Some(Dispatched { index, occurrence, trigger, result })
    }

    fn is_covered(&self, occurrence: NaiveDateTime) -> bool {
        self.last_completed
            .is_some_and(|last| last >= occurrence - Duration::seconds(ON_TIME_WINDOW_SECS))
    }

    fn enabled_entries(&self) -> impl Iterator<Item = (usize, &ScheduledFeeding)> {
        self.table.iter().enumerate().filter(|(_, e)| e.enabled)
    }

    fn find_on_time(&self, now: NaiveDateTime) -> Option<(usize, NaiveDateTime)> {
        let today = now.date();
        // Yesterday and tomorrow cover entries straddling midnight.
        let days = [today.pred_opt(), Some(today), today.succ_opt()];
        for (i, entry) in self.enabled_entries() {
            for day in days.iter().flatten() {
                let Some(at) = entry.occurrence_on(*day) else { continue };
                if (now - at).num_seconds().abs() <= ON_TIME_WINDOW_SECS && !self.is_covered(at) {
                    return Some((i, at));
                }
            }
        }
        None
    }

    /// Earliest eligible missed occurrence.
    fn find_recoverable(&self, now: NaiveDateTime) -> Option<(usize, NaiveDateTime, Trigger)> {
        let horizon = now - Duration::hours(i64::from(self.max_recovery_hours));
        let start = match self.last_completed {
            Some(last) if last > horizon => last,
            _ => horizon,
        };
        let tolerance = i64::from(self.tolerance_minutes);

        let mut best: Option<(usize, NaiveDateTime, i64)> = None;
        let mut day = start.date();
        while day <= now.date() {
            for (i, entry) in self.enabled_entries() {
                let Some(at) = entry.occurrence_on(day) else { continue };
                if at < horizon || at >= now || self.is_covered(at) {
                    continue;
                }
                if self.last_completed.is_some_and(|last| at <= last) {
                    continue;
                }
                let late = (now - at).num_minutes();
                if late > 1 && late <= tolerance && best.is_none_or(|(_, b, _)| at < b) {
                    best = Some((i, at, late));
                }
            }
            day = day.succ_opt()?;
        }
        best.map(|(i, at, late)| (i, at, Trigger::Recovered { minutes_late: late }))
    }

    /// Refresh the cached next occurrence.
    pub fn recompute_next(&mut self, now: NaiveDateTime) {
        let today = now.date();
        let tomorrow = today.succ_opt();
        self.next = self
            .enabled_entries()
            .filter_map(|(i, e)| {
                let at = e.occurrence_on(today)?;
                let at = if at <= now { e.occurrence_on(tomorrow?)? } else { at };
                Some(NextFeeding { at, index: i })
            })
            .min_by_key(|n| (n.at, n.index));
    }

    /// Stamp `at` as the last dispatched feeding and persist it.
    pub fn record_feeding(&mut self, at: NaiveDateTime, storage: &mut dyn StoragePort) {
        if let Some(last) = self.last_completed {
            if at < last {
                warn!("schedule: last feeding moves back from {} to {} (clock corrected)", last, at);
            }
        }
        self.last_completed = Some(at);
        let secs = at.and_utc().timestamp();
        if let Err(e) = write_i64(storage, NVS_NS_SCHEDULE, NVS_KEY_LAST_FEEDING, secs) {
            warn!("schedule: failed to persist last feeding: {}", e);
        }
    }

    /// A feeding started outside the schedule still counts as the meal.
    pub fn record_manual_feeding(&mut self, at: NaiveDateTime, storage: &mut dyn StoragePort) {
        info!("schedule: manual feeding recorded at {}", at);
        self.record_feeding(at, storage);
    }

    // ── Mutations ─────────────────────────────────────────────

    pub fn add(
        &mut self,
        entry: ScheduledFeeding,
        now: Option<NaiveDateTime>,
        storage: &mut dyn StoragePort,
    ) -> Result<usize, ScheduleError> {
        entry.validate()?;
        self.table.push(entry).map_err(|_| ScheduleError::TableFull)?;
        let index = self.table.len() - 1;
        info!("schedule: added entry {}", index);
        self.commit(now, storage);
        Ok(index)
    }

    pub fn edit(
        &mut self,
        index: usize,
        entry: ScheduledFeeding,
        now: Option<NaiveDateTime>,
        storage: &mut dyn StoragePort,
    ) -> Result<(), ScheduleError> {
        entry.validate()?;
        let slot = self.table.get_mut(index).ok_or(ScheduleError::IndexOutOfRange(index))?;
        *slot = entry;
        info!("schedule: edited entry {}", index);
        self.commit(now, storage);
        Ok(())
    }

    /// Remove an entry; later entries shift down by one.
    pub fn remove(
        &mut self,
        index: usize,
        now: Option<NaiveDateTime>,
        storage: &mut dyn StoragePort,
    ) -> Result<ScheduledFeeding, ScheduleError> {
        if index >= self.table.len() {
            return Err(ScheduleError::IndexOutOfRange(index));
        }
        let removed = self.table.remove(index);
        info!("schedule: removed entry {} ('{}')", index, removed.description);
        self.commit(now, storage);
        Ok(removed)
    }

    pub fn set_entry_enabled(
        &mut self,
        index: usize,
        enabled: bool,
        now: Option<NaiveDateTime>,
        storage: &mut dyn StoragePort,
    ) -> Result<(), ScheduleError> {
        let slot = self.table.get_mut(index).ok_or(ScheduleError::IndexOutOfRange(index))?;
        slot.enabled = enabled;
        self.commit(now, storage);
        Ok(())
    }

    pub fn clear_all(&mut self, now: Option<NaiveDateTime>, storage: &mut dyn StoragePort) {
        self.table.clear();
        info!("schedule: cleared all entries");
        self.commit(now, storage);
    }

    /// Replace the whole table. Nothing changes unless every entry is valid.
    pub fn replace_all(
        &mut self,
        entries: &[ScheduledFeeding],
        now: Option<NaiveDateTime>,
        storage: &mut dyn StoragePort,
    ) -> Result<(), ScheduleError> {
        if entries.len() > MAX_SCHEDULES {
            return Err(ScheduleError::TableFull);
        }
        for e in entries {
            e.validate()?;
        }
        self.table = entries.iter().cloned().collect();
        self.commit(now, storage);
        Ok(())
    }

    /// Whole-table switch.
    pub fn set_enabled(&mut self, enabled: bool, storage: &mut dyn StoragePort) {
        self.enabled = enabled;
        info!("schedule: automatic feeding {}", if enabled { "enabled" } else { "disabled" });
        if let Err(e) = storage.write(NVS_NS_SCHEDULE, NVS_KEY_SCHEDULE_ENABLED, &[u8::from(enabled)]) {
            warn!("schedule: failed to persist enabled flag: {}", e);
        }
    }

    pub fn set_tolerance(&mut self, minutes: u8) -> Result<(), ScheduleError> {
        if !TOLERANCE_RANGE_MINUTES.contains(&minutes) {
            return Err(ScheduleError::ToleranceOutOfRange(minutes));
        }
        self.tolerance_minutes = minutes;
        Ok(())
    }

    pub fn set_max_recovery_hours(&mut self, hours: u8) -> Result<(), ScheduleError> {
        if !RECOVERY_RANGE_HOURS.contains(&hours) {
            return Err(ScheduleError::RecoveryHoursOutOfRange(hours));
        }
        self.max_recovery_hours = hours;
        Ok(())
    }

    /// Persist the table and refresh the next occurrence. Without a clock
    /// reading the cache is dropped until the next processing pass.
    fn commit(&mut self, now: Option<NaiveDateTime>, storage: &mut dyn StoragePort) {
        if let Err(e) = table::save_table(storage, &self.table) {
            warn!("schedule: failed to persist table: {}", e);
        }
        match now {
            Some(now) => self.recompute_next(now),
            None => self.next = None,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn entries(&self) -> &[ScheduledFeeding] {
        &self.table
    }

    pub fn get(&self, index: usize) -> Option<&ScheduledFeeding> {
        self.table.get(index)
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn is_entry_enabled(&self, index: usize) -> bool {
        self.table.get(index).is_some_and(|e| e.enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn next_occurrence(&self) -> Option<NextFeeding> {
        self.next
    }

    pub fn last_completed(&self) -> Option<NaiveDateTime> {
        self.last_completed
    }

    pub fn tolerance_minutes(&self) -> u8 {
        self.tolerance_minutes
    }

    pub fn max_recovery_hours(&self) -> u8 {
        self.max_recovery_hours
    }
}
