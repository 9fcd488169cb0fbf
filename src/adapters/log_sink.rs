//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written since boot.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            AppEvent::FeedingStarted(t) => {
                info!("FEED  | start | {} portion(s) ({} steps) | source={:?}", t.portions, t.steps, t.source);
            }
            AppEvent::FeedingCompleted { ticket, duration_ms } => {
                info!("FEED  | done | {} portion(s) in {} ms | source={:?}", ticket.portions, duration_ms, ticket.source);
            }
            AppEvent::FeedingCancelled => {
                info!("FEED  | cancelled");
            }
            AppEvent::FeedingRejected { source, reason } => {
                warn!("FEED  | rejected ({:?}): {}", source, reason);
            }
            AppEvent::ScheduleChanged => {
                info!("SCHED | table or settings changed");
            }
            AppEvent::TimeSynced { source, delta_secs: Some(delta) } => {
                info!("TIME  | synced via {} {} (delta {:+}s)", source.protocol(), source.host(), delta);
            }
            AppEvent::TimeSynced { source, delta_secs: None } => {
                info!("TIME  | synced via {} {} (clock was unreadable)", source.protocol(), source.host());
            }
            AppEvent::TimeSyncFailed => {
                warn!("TIME  | every source failed");
            }
            AppEvent::StatusChanged(status) => {
                info!("STATE | {}", status.label());
            }
        }
    }
}
