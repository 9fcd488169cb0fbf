//! Unified error types for the feeder firmware.
//!
//! Each subsystem has its own small `Copy` error enum; the top-level
//! [`Error`] wraps them so the boot path and command handling stay uniform.
//! Port-level errors (storage, config, clock, transports) live next to their
//! traits in [`crate::app::ports`].

use core::fmt;

use crate::app::ports::{ClockError, ConfigError, StorageError, TransportError};

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A feeding request was refused.
    Feed(FeedError),
    /// A schedule mutation was refused.
    Schedule(ScheduleError),
    /// Durable storage failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// The real-time clock could not be read or written.
    Clock(ClockError),
    /// A time-source transport failed.
    Transport(TransportError),
    /// The subsystem is mid-operation and cannot take the request.
    Busy(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feed(e) => write!(f, "feed: {e}"),
            Self::Schedule(e) => write!(f, "schedule: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Clock(e) => write!(f, "clock: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Feeding errors
// ---------------------------------------------------------------------------

/// Reasons the arbiter refuses to start a feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedError {
    /// Portion count outside `MIN_PORTIONS..=MAX_PORTIONS`.
    InvalidPortions(u8),
    /// Another feeding is still in flight.
    AlreadyFeeding,
    /// The actuator is absent or failed to initialise.
    ActuatorNotReady,
    /// Cancel requested with nothing in flight.
    NotFeeding,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPortions(p) => write!(f, "invalid portion count {p}"),
            Self::AlreadyFeeding => write!(f, "feeding already in progress"),
            Self::ActuatorNotReady => write!(f, "actuator not ready"),
            Self::NotFeeding => write!(f, "no feeding in progress"),
        }
    }
}

impl From<FeedError> for Error {
    fn from(e: FeedError) -> Self {
        Self::Feed(e)
    }
}

// ---------------------------------------------------------------------------
// Schedule errors
// ---------------------------------------------------------------------------

/// Validation failures for schedule-table mutations and engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// Hour > 23 or minute/second > 59.
    InvalidTime,
    InvalidPortions(u8),
    /// The table already holds `MAX_SCHEDULES` entries.
    TableFull,
    IndexOutOfRange(usize),
    ToleranceOutOfRange(u8),
    RecoveryHoursOutOfRange(u8),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTime => write!(f, "invalid time of day"),
            Self::InvalidPortions(p) => write!(f, "invalid portion count {p}"),
            Self::TableFull => write!(f, "schedule table full"),
            Self::IndexOutOfRange(i) => write!(f, "no schedule at index {i}"),
            Self::ToleranceOutOfRange(m) => write!(f, "tolerance {m} min out of range 1-120"),
            Self::RecoveryHoursOutOfRange(h) => write!(f, "recovery horizon {h} h out of range 1-72"),
        }
    }
}

impl From<ScheduleError> for Error {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

// ---------------------------------------------------------------------------
// Port error conversions
// ---------------------------------------------------------------------------

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ClockError> for Error {
    fn from(e: ClockError) -> Self {
        Self::Clock(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
