//! GPIO / peripheral pin assignments for the feeder main board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Feed stepper (28BYJ-48 through a ULN2003 darlington array)
// ---------------------------------------------------------------------------

pub const STEPPER_IN1_GPIO: i32 = 19;
pub const STEPPER_IN2_GPIO: i32 = 18;
pub const STEPPER_IN3_GPIO: i32 = 5;
pub const STEPPER_IN4_GPIO: i32 = 17;

// ---------------------------------------------------------------------------
// I²C bus (DS3231 RTC)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
pub const I2C_FREQ_HZ: u32 = 100_000;

// ---------------------------------------------------------------------------
// Status LED (discrete RGB, common cathode)
// ---------------------------------------------------------------------------

pub const LED_R_GPIO: i32 = 25;
pub const LED_G_GPIO: i32 = 26;
pub const LED_B_GPIO: i32 = 27;
/// LEDC frequency for RGB status LED (1 kHz).
pub const LED_PWM_FREQ_HZ: u32 = 1_000;

// ---------------------------------------------------------------------------
// User button (active-low, internal pull-up)
// ---------------------------------------------------------------------------

/// Momentary push-button for manual feeding.
pub const BUTTON_GPIO: i32 = 4;
