//! Outbound application events.
//!
//! The [`FeederService`](super::service::FeederService) emits these through
//! the [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them.

use crate::arbiter::{FeedSource, FeedTicket};
use crate::error::FeedError;
use crate::status::SystemStatus;
use crate::timesync::source::TimeSource;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Motor started for an accepted feeding.
    FeedingStarted(FeedTicket),

    /// Motor went idle after a feeding; `duration_ms` is uptime elapsed.
    FeedingCompleted { ticket: FeedTicket, duration_ms: u64 },

    /// A feeding was stopped part-way.
    FeedingCancelled,

    /// A feeding request was refused.
    FeedingRejected { source: FeedSource, reason: FeedError },

    /// Schedule table, switch or recovery settings changed.
    ScheduleChanged,

    /// Clock confirmed against `source`. `delta_secs` is zero when the
    /// clock was already within tolerance and `None` when it was unreadable.
    TimeSynced { source: TimeSource, delta_secs: Option<i64> },

    /// Every time source failed this cycle.
    TimeSyncFailed,

    StatusChanged(SystemStatus),
}
