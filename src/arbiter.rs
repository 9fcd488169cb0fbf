//! Feeding arbiter: the only path to the feed motor.
//!
//! Guarantees at most one feeding in flight. Every request (scheduled,
//! recovered, manual, button) goes through [`FeedingArbiter::start`]; the
//! motor task calls [`FeedingArbiter::service`] at high frequency and the
//! feeding monitor calls [`FeedingArbiter::poll_completion`] until the
//! motor reports idle.
//!
//! `feeding_in_progress` is written only here. The schedule engine and
//! status derivation read it through [`FeedGate::is_feeding`] and
//! [`FeedingArbiter::is_feeding`].

use log::{info, warn};

use crate::app::ports::ActuatorPort;
use crate::config::{portions_valid, MAX_PORTIONS, MIN_PORTIONS};
use crate::error::FeedError;

/// Who asked for a feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// Command from a collaborator (console, app).
    Manual,
    /// Push-button long press.
    Button,
    /// On-time schedule trigger.
    Scheduled,
    /// Missed-feeding recovery.
    Recovered,
}

/// Accepted feeding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedTicket {
    pub portions: u8,
    pub steps: i32,
    pub source: FeedSource,
}

/// Feeding currently driving the motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFeeding {
    pub ticket: FeedTicket,
    pub started_ms: u64,
}

/// Narrow view of the arbiter handed to the schedule engine, which must
/// never touch the actuator itself.
pub trait FeedGate {
    fn is_feeding(&self) -> bool;

    fn dispatch(&mut self, portions: u8, source: FeedSource) -> Result<FeedTicket, FeedError>;
}

pub struct FeedingArbiter<A: ActuatorPort> {
    actuator: A,
    steps_per_portion: u32,
    feeding_in_progress: bool,
    active: Option<ActiveFeeding>,
    completed: u32,
    cancelled: u32,
}

impl<A: ActuatorPort> FeedingArbiter<A> {
    pub fn new(actuator: A, steps_per_portion: u32) -> Self {
        if !actuator.is_ready() {
            warn!("arbiter: actuator not ready at construction; feedings will be refused");
        }
        Self {
            actuator,
            steps_per_portion,
            feeding_in_progress: false,
            active: None,
            completed: 0,
            cancelled: 0,
        }
    }

    /// Validate and launch a feeding. The caller is responsible for arming
    /// the completion monitor when this returns `Ok`.
    pub fn start(&mut self, portions: u8, source: FeedSource, now_ms: u64) -> Result<FeedTicket, FeedError> {
        if !portions_valid(portions) {
            warn!(
                "arbiter: rejected {} portion(s) from {:?}; must be {}..={}",
                portions, source, MIN_PORTIONS, MAX_PORTIONS
            );
            return Err(FeedError::InvalidPortions(portions));
        }
        if self.feeding_in_progress {
            warn!("arbiter: rejected {:?} request; feeding already in progress", source);
            return Err(FeedError::AlreadyFeeding);
        }
        if !self.actuator.is_ready() {
            warn!("arbiter: rejected {:?} request; actuator not ready", source);
            return Err(FeedError::ActuatorNotReady);
        }

        let steps = (u32::from(portions) * self.steps_per_portion).min(i32::MAX as u32) as i32;
        self.actuator.move_by(steps);
        self.feeding_in_progress = true;

        let ticket = FeedTicket { portions, steps, source };
        self.active = Some(ActiveFeeding { ticket, started_ms: now_ms });
        info!("arbiter: dispensing {} portion(s) ({} steps) for {:?}", portions, steps, source);
        Ok(ticket)
    }

    /// Advance the motor. Called from the motor task.
    pub fn service(&mut self, now_ms: u64) {
        self.actuator.service(now_ms);
    }

    /// Clear the feeding flag once the motor is idle. Returns the finished
    /// feeding on the call that observes completion.
    pub fn poll_completion(&mut self, now_ms: u64) -> Option<ActiveFeeding> {
        if !self.feeding_in_progress || self.actuator.is_busy() {
            return None;
        }
        self.feeding_in_progress = false;
        self.completed = self.completed.wrapping_add(1);
        let done = self.active.take();
        if let Some(f) = done {
            info!(
                "arbiter: dispensed {} portion(s) in {} ms",
                f.ticket.portions,
                now_ms.saturating_sub(f.started_ms)
            );
        }
        done
    }

    /// Stop the motor immediately. Returns `false` when nothing was running.
    pub fn cancel(&mut self) -> bool {
        if !self.feeding_in_progress {
            return false;
        }
        self.actuator.stop();
        self.feeding_in_progress = false;
        self.cancelled = self.cancelled.wrapping_add(1);
        if let Some(f) = self.active.take() {
            info!("arbiter: cancelled {} portion feeding", f.ticket.portions);
        }
        true
    }

    pub fn is_feeding(&self) -> bool {
        self.feeding_in_progress
    }

    pub fn is_ready(&self) -> bool {
        self.actuator.is_ready()
    }

    pub fn active(&self) -> Option<&ActiveFeeding> {
        self.active.as_ref()
    }

    /// (completed, cancelled) feedings since boot.
    pub fn counters(&self) -> (u32, u32) {
        (self.completed, self.cancelled)
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }
}
