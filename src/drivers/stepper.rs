//! Feed stepper driver (28BYJ-48 through a ULN2003).
//!
//! Four coil outputs driven in two-coil full-step sequence, with a linear
//! speed ramp up to [`STEPPER_MAX_SPEED_SPS`] and back down before the
//! target. Steps are generated from [`service`](ActuatorPort::service),
//! which the motor task calls every 10 ms; each call emits every step
//! that has come due since the last one, capped at a small burst.
//!
//! Coils are released as soon as a move completes or is stopped so the
//! motor does not heat up while idle.
//!
//! ## Dual-target design
//!
//! Generic over `embedded_hal::digital::OutputPin`: `PinDriver`s on the
//! board, recording fakes in host tests.

use embedded_hal::digital::{OutputPin, PinState};
use log::{debug, warn};

use crate::app::ports::ActuatorPort;
use crate::config::{STEPPER_ACCELERATION_SPS2, STEPPER_MAX_SPEED_SPS};

/// Coil pattern per phase, IN1..IN4.
const FULL_STEP: [[bool; 4]; 4] = [
    [true, true, false, false],
    [false, true, true, false],
    [false, false, true, true],
    [true, false, false, true],
];

/// Most steps emitted by a single `service` call.
const MAX_BURST: u32 = 8;

pub struct StepperMotor<P: OutputPin> {
    coils: [P; 4],
    ready: bool,
    reversed: bool,
    phase: usize,
    position: i64,
    remaining: i32,
    speed_sps: f32,
    max_speed_sps: f32,
    accel: f32,
    next_step_us: Option<u64>,
}

impl<P: OutputPin> StepperMotor<P> {
    /// Take ownership of the four coil outputs (IN1..IN4) and de-energise
    /// them. A pin that refuses the write leaves the driver not ready.
    pub fn new(coils: [P; 4]) -> Self {
        let mut motor = Self {
            coils,
            ready: true,
            reversed: false,
            phase: 0,
            position: 0,
            remaining: 0,
            speed_sps: 0.0,
            max_speed_sps: STEPPER_MAX_SPEED_SPS as f32,
            accel: STEPPER_ACCELERATION_SPS2 as f32,
            next_step_us: None,
        };
        if !motor.release() {
            warn!("stepper: coil outputs not writable, driver disabled");
            motor.ready = false;
        }
        motor
    }

    /// Swap the rotation sense for augers mounted the other way round.
    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    pub fn set_max_speed(&mut self, steps_per_sec: u32) {
        self.max_speed_sps = steps_per_sec.max(1) as f32;
    }

    /// Steps taken since boot, signed by direction.
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    fn min_speed(&self) -> f32 {
        (2.0 * self.accel).sqrt().min(self.max_speed_sps)
    }

    fn write_phase(&mut self, phase: usize) -> bool {
        let pattern = FULL_STEP[phase];
        self.coils
            .iter_mut()
            .zip(pattern)
            .all(|(pin, on)| pin.set_state(PinState::from(on)).is_ok())
    }

    fn release(&mut self) -> bool {
        self.coils.iter_mut().all(|pin| pin.set_low().is_ok())
    }

    fn step_once(&mut self) {
        let forward = (self.remaining > 0) != self.reversed;
        self.phase = if forward { (self.phase + 1) % 4 } else { (self.phase + 3) % 4 };
        if !self.write_phase(self.phase) {
            warn!("stepper: coil write failed, aborting move");
            self.ready = false;
            self.halt();
            return;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            self.position += 1;
        } else {
            self.remaining += 1;
            self.position -= 1;
        }
    }

    /// Speed for the next step: accelerate, cruise, or brake so the ramp
    /// reaches the minimum speed on the last step.
    fn update_speed(&mut self) {
        let min = self.min_speed();
        if self.speed_sps < min {
            self.speed_sps = min;
            return;
        }
        let stopping_steps = (self.speed_sps * self.speed_sps) / (2.0 * self.accel);
        if (self.remaining.unsigned_abs() as f32) <= stopping_steps {
            self.speed_sps = (self.speed_sps - self.accel / self.speed_sps).max(min);
        } else {
            self.speed_sps = (self.speed_sps + self.accel / self.speed_sps).min(self.max_speed_sps);
        }
    }

    fn halt(&mut self) {
        self.remaining = 0;
        self.speed_sps = 0.0;
        self.next_step_us = None;
        if !self.release() {
            self.ready = false;
        }
    }
}

impl<P: OutputPin> ActuatorPort for StepperMotor<P> {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn move_by(&mut self, steps: i32) {
        if !self.ready || steps == 0 {
            return;
        }
        self.remaining = self.remaining.saturating_add(steps);
        debug!("stepper: move {} (remaining {})", steps, self.remaining);
    }

    fn is_busy(&self) -> bool {
        self.remaining != 0
    }

    fn stop(&mut self) {
        if self.remaining != 0 {
            debug!("stepper: stopped with {} steps left", self.remaining);
        }
        self.halt();
    }

    fn service(&mut self, now_ms: u64) {
        if self.remaining == 0 {
            return;
        }
        let now_us = now_ms * 1_000;
        let mut due = *self.next_step_us.get_or_insert(now_us);
        let mut burst = 0;
        while self.remaining != 0 && due <= now_us && burst < MAX_BURST {
            self.update_speed();
            self.step_once();
            burst += 1;
            due += (1_000_000.0 / self.speed_sps.max(1.0)) as u64;
        }
        if self.remaining == 0 {
            self.halt();
        } else if self.ready {
            // Never carry a backlog into the next call.
            self.next_step_us = Some(due.max(now_us.saturating_sub(1_000)));
        }
    }
}
