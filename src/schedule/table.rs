//! Schedule entries and their NVS layout.
//!
//! ```text
//! feed_sched::count      u8, number of entries (missing or > 10 ⇒ reseed)
//! feed_sched::s0 .. s9   postcard(ScheduledFeeding)
//! feed_sched::enabled    u8, whole-table switch
//! feed_sched::last_feed  i64 LE, local seconds of last dispatched feeding
//! ```
//!
//! The count is written after the records so a power cut mid-save leaves
//! the previous count pointing at records that still decode.

use core::fmt::Write as _;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use heapless::Vec;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::{
    portions_valid, MAX_DESCRIPTION_LEN, MAX_SCHEDULES, NVS_KEY_SCHEDULE_COUNT, NVS_NS_SCHEDULE,
};
use crate::error::ScheduleError;

/// Largest postcard encoding of a [`ScheduledFeeding`].
const RECORD_BUF_LEN: usize = 5 + 1 + MAX_DESCRIPTION_LEN + 8;

/// One daily feeding. Identity is the position in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledFeeding {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub portions: u8,
    pub enabled: bool,
    pub description: heapless::String<MAX_DESCRIPTION_LEN>,
}

impl ScheduledFeeding {
    /// Enabled entry; descriptions longer than 49 characters are cut.
    pub fn new(hour: u8, minute: u8, second: u8, portions: u8, description: &str) -> Self {
        Self {
            hour,
            minute,
            second,
            portions,
            enabled: true,
            description: truncate(description),
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.hour > 23 || self.minute > 59 || self.second > 59 {
            return Err(ScheduleError::InvalidTime);
        }
        if !portions_valid(self.portions) {
            return Err(ScheduleError::InvalidPortions(self.portions));
        }
        Ok(())
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), u32::from(self.second))
    }

    /// This entry's instant on `date`.
    pub fn occurrence_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        self.time_of_day().map(|t| date.and_time(t))
    }
}

fn truncate(text: &str) -> heapless::String<MAX_DESCRIPTION_LEN> {
    let mut out = heapless::String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn record_key(index: usize) -> heapless::String<4> {
    let mut key = heapless::String::new();
    let _ = write!(key, "s{}", index);
    key
}

/// Why a persisted table could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// No count sentinel (first boot).
    Missing,
    /// Count out of range or a record failed to decode/validate.
    Corrupt,
    Storage(StorageError),
}

/// Read the whole table.
pub fn load_table(storage: &dyn StoragePort) -> Result<Vec<ScheduledFeeding, MAX_SCHEDULES>, LoadError> {
    let mut count = [0u8; 1];
    match storage.read(NVS_NS_SCHEDULE, NVS_KEY_SCHEDULE_COUNT, &mut count) {
        Ok(1) => {}
        Ok(_) => return Err(LoadError::Corrupt),
        Err(StorageError::NotFound) => return Err(LoadError::Missing),
        Err(e) => return Err(LoadError::Storage(e)),
    }
    let count = usize::from(count[0]);
    if count > MAX_SCHEDULES {
        return Err(LoadError::Corrupt);
    }

    let mut table = Vec::new();
    let mut buf = [0u8; RECORD_BUF_LEN];
    for i in 0..count {
        let n = storage
            .read(NVS_NS_SCHEDULE, &record_key(i), &mut buf)
            .map_err(|e| match e {
                StorageError::NotFound => LoadError::Corrupt,
                other => LoadError::Storage(other),
            })?;
        let entry: ScheduledFeeding = postcard::from_bytes(&buf[..n]).map_err(|_| LoadError::Corrupt)?;
        if entry.validate().is_err() {
            return Err(LoadError::Corrupt);
        }
        table.push(entry).map_err(|_| LoadError::Corrupt)?;
    }
    Ok(table)
}

/// Persist every record, then the count, then drop keys past the end.
pub fn save_table(storage: &mut dyn StoragePort, table: &[ScheduledFeeding]) -> Result<(), StorageError> {
    for (i, entry) in table.iter().enumerate() {
        let mut buf = [0u8; RECORD_BUF_LEN];
        let bytes = postcard::to_slice(entry, &mut buf).map_err(|_| StorageError::Corrupted)?;
        storage.write(NVS_NS_SCHEDULE, &record_key(i), bytes)?;
    }
    storage.write(NVS_NS_SCHEDULE, NVS_KEY_SCHEDULE_COUNT, &[table.len() as u8])?;

    for i in table.len()..MAX_SCHEDULES {
        let key = record_key(i);
        if storage.exists(NVS_NS_SCHEDULE, &key) {
            if let Err(e) = storage.delete(NVS_NS_SCHEDULE, &key) {
                warn!("schedule: could not delete stale record {}: {}", key, e);
            }
        }
    }
    Ok(())
}
