//! Feed motor, status LED, button and one-shot hardware initialisation.

pub mod button;
pub mod hw_init;
pub mod led_patterns;
pub mod status_led;
pub mod stepper;
