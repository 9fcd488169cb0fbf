//! System status derivation.
//!
//! One authority decides what the status LED shows. Every tick the
//! desired status is derived from live state:
//!
//! | Priority | Condition                      | Status              |
//! |----------|--------------------------------|---------------------|
//! | 1        | cancel acknowledged < 300 ms   | `CancelPulse`       |
//! | 2        | feeding in progress            | `Feeding`           |
//! | 3        | actuator not ready             | `Error`             |
//! | 4        | time sync cycle running        | `TimeSyncing`       |
//! | 5        | network down                   | `NetworkConnecting` |
//! | 6        | otherwise                      | `Ready`             |
//!
//! The indicator is only written when the result changes. `Booting` is
//! the initial value and is left as soon as the service starts ticking.

use crate::app::ports::StatusIndicator;
use crate::config::CANCEL_PULSE_MS;
use log::debug;

/// What the status LED is asked to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Booting,
    NetworkConnecting,
    TimeSyncing,
    Ready,
    Feeding,
    /// Short acknowledgement after a cancelled feeding.
    CancelPulse,
    Error,
}

impl SystemStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::NetworkConnecting => "network-connecting",
            Self::TimeSyncing => "time-syncing",
            Self::Ready => "ready",
            Self::Feeding => "feeding",
            Self::CancelPulse => "cancel",
            Self::Error => "error",
        }
    }
}

/// Inputs sampled once per tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusInputs {
    pub feeding: bool,
    pub actuator_ready: bool,
    pub syncing: bool,
    pub network_up: bool,
}

impl StatusInputs {
    fn derive(self) -> SystemStatus {
        if self.feeding {
            SystemStatus::Feeding
        } else if !self.actuator_ready {
            SystemStatus::Error
        } else if self.syncing {
            SystemStatus::TimeSyncing
        } else if !self.network_up {
            SystemStatus::NetworkConnecting
        } else {
            SystemStatus::Ready
        }
    }
}

/// Tracks the last shown status and the protected cancel pulse.
#[derive(Debug)]
pub struct StatusDeriver {
    shown: SystemStatus,
    pulse_until_ms: Option<u64>,
}

impl StatusDeriver {
    pub fn new() -> Self {
        Self { shown: SystemStatus::Booting, pulse_until_ms: None }
    }

    pub fn current(&self) -> SystemStatus {
        self.shown
    }

    /// Show `CancelPulse` now and hold it for [`CANCEL_PULSE_MS`].
    pub fn raise_cancel_pulse(&mut self, now_ms: u64, indicator: &mut dyn StatusIndicator) {
        self.pulse_until_ms = Some(now_ms + CANCEL_PULSE_MS);
        self.apply(SystemStatus::CancelPulse, indicator);
    }

    /// Re-derive and push to the indicator if it changed. Returns the new
    /// status when a change was applied.
    pub fn update(
        &mut self,
        now_ms: u64,
        inputs: StatusInputs,
        indicator: &mut dyn StatusIndicator,
    ) -> Option<SystemStatus> {
        if let Some(until) = self.pulse_until_ms {
            if now_ms < until {
                return None;
            }
            self.pulse_until_ms = None;
        }
        self.apply(inputs.derive(), indicator)
    }

    fn apply(&mut self, status: SystemStatus, indicator: &mut dyn StatusIndicator) -> Option<SystemStatus> {
        if status == self.shown {
            return None;
        }
        debug!("status: {} -> {}", self.shown.label(), status.label());
        self.shown = status;
        indicator.show(status);
        Some(status)
    }
}

impl Default for StatusDeriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<SystemStatus>);

    impl StatusIndicator for Recorder {
        fn show(&mut self, status: SystemStatus) {
            self.0.push(status);
        }
    }

    fn idle() -> StatusInputs {
        StatusInputs { feeding: false, actuator_ready: true, syncing: false, network_up: true }
    }

    #[test]
    fn applies_only_on_change() {
        let mut d = StatusDeriver::new();
        let mut led = Recorder::default();
        assert_eq!(d.update(0, idle(), &mut led), Some(SystemStatus::Ready));
        assert_eq!(d.update(10, idle(), &mut led), None);
        assert_eq!(led.0, vec![SystemStatus::Ready]);
    }

    #[test]
    fn feeding_beats_transients() {
        let mut d = StatusDeriver::new();
        let mut led = Recorder::default();
        let inputs = StatusInputs { feeding: true, syncing: true, network_up: false, ..idle() };
        d.update(0, inputs, &mut led);
        assert_eq!(d.current(), SystemStatus::Feeding);
    }

    #[test]
    fn transients_when_idle() {
        let mut d = StatusDeriver::new();
        let mut led = Recorder::default();
        d.update(0, StatusInputs { syncing: true, ..idle() }, &mut led);
        assert_eq!(d.current(), SystemStatus::TimeSyncing);
        d.update(1, StatusInputs { network_up: false, ..idle() }, &mut led);
        assert_eq!(d.current(), SystemStatus::NetworkConnecting);
        d.update(2, StatusInputs { actuator_ready: false, ..idle() }, &mut led);
        assert_eq!(d.current(), SystemStatus::Error);
    }

    #[test]
    fn cancel_pulse_holds_for_its_duration() {
        let mut d = StatusDeriver::new();
        let mut led = Recorder::default();
        d.update(0, StatusInputs { feeding: true, ..idle() }, &mut led);

        d.raise_cancel_pulse(500, &mut led);
        assert_eq!(d.current(), SystemStatus::CancelPulse);

        // A feeding starting again immediately cannot pre-empt the pulse.
        assert_eq!(d.update(600, StatusInputs { feeding: true, ..idle() }, &mut led), None);
        assert_eq!(d.update(799, idle(), &mut led), None);
        assert_eq!(d.update(800, idle(), &mut led), Some(SystemStatus::Ready));
        assert_eq!(
            led.0,
            vec![SystemStatus::Feeding, SystemStatus::CancelPulse, SystemStatus::Ready]
        );
    }
}
