//! ISR-debounced manual feed button with short and long press detection.
//!
//! ## Hardware
//!
//! Active-low momentary switch with internal pull-up. GPIO fires on
//! falling edge; ISR records the raw timestamp into an atomic, and the
//! `tick()` method (called from the main loop) runs the debounce +
//! gesture state machine against the live pin level.
//!
//! ## Gesture detection
//!
//! | Gesture     | Condition                         | Event        |
//! |-------------|-----------------------------------|--------------|
//! | Short press | Released before 1 s               | `ShortPress` |
//! | Long press  | Held for 1 s (fires while held)   | `LongPress`  |
//!
//! A long press fires once; the release that follows is swallowed.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::BUTTON_LONG_PRESS_MS;

const DEBOUNCE_MS: u32 = 50;

/// Raw ISR timestamp (milliseconds since boot, truncated to u32).
/// Written by the ISR, read by the main loop.
static BUTTON_ISR_TIMESTAMP: AtomicU32 = AtomicU32::new(0);

/// Button events emitted after gesture classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Cancels a feeding in progress.
    ShortPress,
    /// Starts a manual feeding.
    LongPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    DebounceWait { since_ms: u32 },
    Pressed { since_ms: u32 },
    WaitRelease,
}

pub struct ButtonDriver {
    gpio: i32,
    state: GestureState,
    last_isr_ms: u32,
}

impl ButtonDriver {
    pub fn new(gpio: i32) -> Self {
        Self { gpio, state: GestureState::Idle, last_isr_ms: 0 }
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    /// Call from the main loop. Returns a classified gesture, if any.
    pub fn tick(&mut self, now_ms: u32) -> Option<ButtonEvent> {
        let isr_ms = BUTTON_ISR_TIMESTAMP.load(Ordering::Acquire);
        let new_press = isr_ms != self.last_isr_ms && isr_ms != 0;
        if new_press {
            self.last_isr_ms = isr_ms;
        }

        match self.state {
            GestureState::Idle => {
                if new_press {
                    self.state = GestureState::DebounceWait { since_ms: now_ms };
                }
                None
            }

            GestureState::DebounceWait { since_ms } => {
                if now_ms.wrapping_sub(since_ms) >= DEBOUNCE_MS {
                    // Bounce or glitch: the pin is already back up.
                    self.state = if self.is_pressed_hw() {
                        GestureState::Pressed { since_ms }
                    } else {
                        GestureState::Idle
                    };
                }
                None
            }

            GestureState::Pressed { since_ms } => {
                if !self.is_pressed_hw() {
                    self.state = GestureState::Idle;
                    return Some(ButtonEvent::ShortPress);
                }
                if now_ms.wrapping_sub(since_ms) >= BUTTON_LONG_PRESS_MS {
                    self.state = GestureState::WaitRelease;
                    return Some(ButtonEvent::LongPress);
                }
                None
            }

            GestureState::WaitRelease => {
                if !self.is_pressed_hw() {
                    self.state = GestureState::Idle;
                }
                None
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn is_pressed_hw(&self) -> bool {
        !crate::drivers::hw_init::gpio_read(self.gpio)
    }

    #[cfg(not(target_os = "espidf"))]
    fn is_pressed_hw(&self) -> bool {
        sim::PRESSED.load(Ordering::Acquire)
    }
}

/// ISR handler: register this on the button GPIO falling edge.
/// Safe to call from interrupt context (lock-free atomic store).
pub fn button_isr_handler(now_ms: u32) {
    BUTTON_ISR_TIMESTAMP.store(now_ms, Ordering::Release);
}

/// Host simulation of the pin level.
#[cfg(not(target_os = "espidf"))]
pub mod sim {
    use core::sync::atomic::{AtomicBool, Ordering};

    pub(super) static PRESSED: AtomicBool = AtomicBool::new(false);

    /// Press (and fire the edge ISR) or release the simulated button.
    pub fn set_pressed(pressed: bool, now_ms: u32) {
        PRESSED.store(pressed, Ordering::Release);
        if pressed {
            super::button_isr_handler(now_ms.max(1));
        }
    }
}
