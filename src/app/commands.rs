//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (console,
//! configuration portal, push button) that the
//! [`FeederService`](super::service::FeederService) interprets and acts upon.

use crate::arbiter::FeedTicket;
use crate::error::Error;
use crate::schedule::ScheduledFeeding;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Dispense now. Counts as the current meal for the schedule.
    FeedNow { portions: u8 },

    /// Stop the feeding in progress.
    CancelFeeding,

    AddSchedule(ScheduledFeeding),

    /// Replace the entry at `index`.
    EditSchedule { index: usize, entry: ScheduledFeeding },

    /// Remove the entry at `index`; later entries shift down.
    RemoveSchedule { index: usize },

    /// Whole-table switch for automatic feeding.
    SetScheduleEnabled(bool),

    SetEntryEnabled { index: usize, enabled: bool },

    ClearSchedules,

    /// Recovery tolerance in minutes (1..=120).
    SetTolerance(u8),

    /// Recovery look-back in hours (1..=72).
    SetMaxRecoveryHours(u8),

    /// Automatic sync interval in milliseconds (1 min..=7 days).
    SetSyncInterval(u64),

    /// Start a time sync cycle immediately.
    ForceTimeSync,
}

/// Synchronous answer to an [`AppCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResponse {
    Ok,
    /// Feeding accepted and motor started.
    Feeding(FeedTicket),
    /// Refused with no state change.
    Rejected(Error),
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

impl<E: Into<Error>> From<Result<(), E>> for CommandResponse {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::Rejected(e.into()),
        }
    }
}
