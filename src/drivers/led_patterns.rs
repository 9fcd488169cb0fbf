//! LED pattern engine.
//!
//! Generates time-varying RGB values for the status LED. The main loop
//! calls `tick()` with the elapsed time and feeds the result into
//! `StatusLed::set_colour()`. Which status wins is decided upstream in
//! [`crate::status`]; this engine only animates the one it is given.
//!
//! | Status              | Colour  | Pattern                |
//! |---------------------|---------|------------------------|
//! | `Booting`           | red     | blink, 500 ms on/off   |
//! | `NetworkConnecting` | blue    | blink, 500 ms on/off   |
//! | `TimeSyncing`       | yellow  | blink, 500 ms on/off   |
//! | `Ready`             | green   | solid                  |
//! | `Feeding`           | green   | blink, 250 ms on/off   |
//! | `CancelPulse`       | magenta | solid                  |
//! | `Error`             | red     | blink, 100 ms on/off   |

use crate::status::SystemStatus;

/// Colour as (R, G, B) tuple, each 0–255.
pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternId {
    Solid,
    /// Square wave, `half_period_ms` on then the same off.
    Blink { half_period_ms: u32 },
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRequest {
    pub colour: Rgb,
    pub pattern: PatternId,
}

pub const COLOUR_RED: Rgb = (255, 0, 0);
pub const COLOUR_GREEN: Rgb = (0, 255, 0);
pub const COLOUR_BLUE: Rgb = (0, 0, 255);
pub const COLOUR_YELLOW: Rgb = (255, 180, 0);
pub const COLOUR_MAGENTA: Rgb = (255, 0, 255);

/// Pattern rendered for each status.
pub const fn pattern_for(status: SystemStatus) -> PatternRequest {
    let (colour, pattern) = match status {
        SystemStatus::Booting => (COLOUR_RED, PatternId::Blink { half_period_ms: 500 }),
        SystemStatus::NetworkConnecting => (COLOUR_BLUE, PatternId::Blink { half_period_ms: 500 }),
        SystemStatus::TimeSyncing => (COLOUR_YELLOW, PatternId::Blink { half_period_ms: 500 }),
        SystemStatus::Ready => (COLOUR_GREEN, PatternId::Solid),
        SystemStatus::Feeding => (COLOUR_GREEN, PatternId::Blink { half_period_ms: 250 }),
        SystemStatus::CancelPulse => (COLOUR_MAGENTA, PatternId::Solid),
        SystemStatus::Error => (COLOUR_RED, PatternId::Blink { half_period_ms: 100 }),
    };
    PatternRequest { colour, pattern }
}

/// LED pattern engine. Stack-allocated, no heap.
pub struct LedPatternEngine {
    phase_ms: u32,
    active: Option<PatternRequest>,
}

impl Default for LedPatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LedPatternEngine {
    pub fn new() -> Self {
        Self { phase_ms: 0, active: None }
    }

    /// Switch to the pattern for `status`. Re-selecting the current
    /// pattern keeps its phase so the blink does not stutter.
    pub fn set_status(&mut self, status: SystemStatus) {
        self.set_pattern(pattern_for(status));
    }

    pub fn set_pattern(&mut self, request: PatternRequest) {
        if self.active != Some(request) {
            self.active = Some(request);
            self.phase_ms = 0;
        }
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.phase_ms = 0;
    }

    pub fn active(&self) -> Option<PatternRequest> {
        self.active
    }

    /// Advance the pattern phase and return the current RGB output.
    pub fn tick(&mut self, delta_ms: u32) -> Rgb {
        self.phase_ms = self.phase_ms.wrapping_add(delta_ms);
        match self.active {
            Some(req) => self.generate(req),
            None => (0, 0, 0),
        }
    }

    fn generate(&self, req: PatternRequest) -> Rgb {
        match req.pattern {
            PatternId::Solid => req.colour,
            PatternId::Off => (0, 0, 0),
            PatternId::Blink { half_period_ms } => {
                let half = half_period_ms.max(1);
                if (self.phase_ms / half) % 2 == 0 { req.colour } else { (0, 0, 0) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_solid_green() {
        let mut engine = LedPatternEngine::new();
        engine.set_status(SystemStatus::Ready);
        assert_eq!(engine.tick(0), COLOUR_GREEN);
        assert_eq!(engine.tick(10_000), COLOUR_GREEN);
    }

    #[test]
    fn no_pattern_returns_black() {
        let mut engine = LedPatternEngine::new();
        assert_eq!(engine.tick(1000), (0, 0, 0));
    }

    #[test]
    fn feeding_blinks_at_250ms() {
        let mut engine = LedPatternEngine::new();
        engine.set_status(SystemStatus::Feeding);
        assert_eq!(engine.tick(0), COLOUR_GREEN);
        assert_eq!(engine.tick(249), COLOUR_GREEN);
        assert_eq!(engine.tick(1), (0, 0, 0));
        assert_eq!(engine.tick(250), COLOUR_GREEN);
    }

    #[test]
    fn error_blinks_faster_than_syncing() {
        let mut engine = LedPatternEngine::new();
        engine.set_status(SystemStatus::Error);
        assert_eq!(engine.tick(150), (0, 0, 0));

        engine.set_status(SystemStatus::TimeSyncing);
        assert_eq!(engine.tick(150), COLOUR_YELLOW);
    }

    #[test]
    fn status_change_restarts_phase() {
        let mut engine = LedPatternEngine::new();
        engine.set_status(SystemStatus::NetworkConnecting);
        assert_eq!(engine.tick(600), (0, 0, 0));
        engine.set_status(SystemStatus::Booting);
        assert_eq!(engine.tick(0), COLOUR_RED);
    }

    #[test]
    fn same_status_keeps_phase() {
        let mut engine = LedPatternEngine::new();
        engine.set_status(SystemStatus::Feeding);
        engine.tick(300);
        engine.set_status(SystemStatus::Feeding);
        assert_eq!(engine.tick(0), (0, 0, 0));
    }

    #[test]
    fn cancel_pulse_is_magenta() {
        assert_eq!(pattern_for(SystemStatus::CancelPulse).colour, COLOUR_MAGENTA);
        assert_eq!(pattern_for(SystemStatus::CancelPulse).pattern, PatternId::Solid);
    }
}
