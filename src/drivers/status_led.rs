//! RGB status LED driver.
//!
//! Three LEDC PWM channels (CH0-2) drive a common-cathode RGB LED.
//! [`LedIndicator`] is the [`StatusIndicator`] adapter: the service tells
//! it which status to show, and the main loop calls
//! [`render`](LedIndicator::render) to animate the pattern.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives three LEDC PWM channels via hw_init.
//! On host/test: tracks state in-memory only.

use log::debug;

use crate::app::ports::StatusIndicator;
use crate::drivers::hw_init;
use crate::drivers::led_patterns::{LedPatternEngine, Rgb};
use crate::status::SystemStatus;

pub struct StatusLed {
    current: Rgb,
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed {
    pub fn new() -> Self {
        Self { current: (0, 0, 0) }
    }

    pub fn set_colour(&mut self, r: u8, g: u8, b: u8) {
        if self.current == (r, g, b) {
            return;
        }
        hw_init::ledc_set(hw_init::LEDC_CH_LED_R, r);
        hw_init::ledc_set(hw_init::LEDC_CH_LED_G, g);
        hw_init::ledc_set(hw_init::LEDC_CH_LED_B, b);
        self.current = (r, g, b);
    }

    pub fn off(&mut self) {
        self.set_colour(0, 0, 0);
    }

    pub fn current_colour(&self) -> Rgb {
        self.current
    }
}

/// Status LED plus its pattern engine.
pub struct LedIndicator {
    led: StatusLed,
    engine: LedPatternEngine,
    shown: Option<SystemStatus>,
}

impl Default for LedIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl LedIndicator {
    pub fn new() -> Self {
        Self { led: StatusLed::new(), engine: LedPatternEngine::new(), shown: None }
    }

    /// Advance the animation by `delta_ms` and drive the LED.
    pub fn render(&mut self, delta_ms: u32) -> Rgb {
        let (r, g, b) = self.engine.tick(delta_ms);
        self.led.set_colour(r, g, b);
        (r, g, b)
    }

    pub fn shown(&self) -> Option<SystemStatus> {
        self.shown
    }

    pub fn colour(&self) -> Rgb {
        self.led.current_colour()
    }
}

impl StatusIndicator for LedIndicator {
    fn show(&mut self, status: SystemStatus) {
        debug!("LED: {}", status.label());
        self.shown = Some(status);
        self.engine.set_status(status);
        // Apply the first frame right away rather than on the next render.
        self.render(0);
    }
}
