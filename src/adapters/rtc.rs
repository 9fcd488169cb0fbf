//! DS3231 real-time clock adapter.
//!
//! Implements [`ClockPort`] over any `embedded-hal` 1.0 I²C bus, so the
//! same code runs against `esp_idf_hal::i2c::I2cDriver` on the board and a
//! register-file fake in host tests.
//!
//! The chip keeps local wall time in BCD registers `0x00..=0x06`. Writing
//! the time also clears the oscillator-stop flag, which the chip sets
//! whenever it loses both main and backup power.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use embedded_hal::i2c::I2c;
use log::warn;

use crate::app::ports::{ClockError, ClockPort};

pub const DS3231_ADDR: u8 = 0x68;

const REG_SECONDS: u8 = 0x00;
const REG_STATUS: u8 = 0x0F;
const STATUS_OSF: u8 = 0x80;
const HOUR_12H: u8 = 0x40;
const HOUR_PM: u8 = 0x20;

fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn decode_hour(reg: u8) -> u8 {
    if reg & HOUR_12H == 0 {
        return bcd_to_bin(reg & 0x3F);
    }
    let h12 = bcd_to_bin(reg & 0x1F) % 12;
    if reg & HOUR_PM != 0 { h12 + 12 } else { h12 }
}

/// Decode the seven time registers. `None` for dates the calendar rejects.
fn decode(regs: &[u8; 7]) -> Option<NaiveDateTime> {
    let second = bcd_to_bin(regs[0] & 0x7F);
    let minute = bcd_to_bin(regs[1] & 0x7F);
    let hour = decode_hour(regs[2]);
    let day = bcd_to_bin(regs[4] & 0x3F);
    let month = bcd_to_bin(regs[5] & 0x1F);
    let year = 2000 + i32::from(bcd_to_bin(regs[6]));
    NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))?
        .and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
}

fn encode(t: NaiveDateTime) -> Result<[u8; 7], ClockError> {
    let year = t.year() - 2000;
    if !(0..=99).contains(&year) {
        return Err(ClockError::InvalidDate);
    }
    Ok([
        bin_to_bcd(t.second() as u8),
        bin_to_bcd(t.minute() as u8),
        bin_to_bcd(t.hour() as u8),
        t.weekday().number_from_sunday() as u8,
        bin_to_bcd(t.day() as u8),
        bin_to_bcd(t.month() as u8),
        bin_to_bcd(year as u8),
    ])
}

pub struct Ds3231<I2C> {
    bus: I2C,
}

impl<I2C: I2c> Ds3231<I2C> {
    pub fn new(bus: I2C) -> Self {
        Self { bus }
    }

    /// `true` when the oscillator stopped since the time was last set; the
    /// registers then hold garbage until the next sync.
    pub fn lost_power(&mut self) -> Result<bool, ClockError> {
        let mut status = [0u8; 1];
        self.bus
            .write_read(DS3231_ADDR, &[REG_STATUS], &mut status)
            .map_err(|_| ClockError::Bus)?;
        Ok(status[0] & STATUS_OSF != 0)
    }

    fn clear_osf(&mut self) -> Result<(), ClockError> {
        let mut status = [0u8; 1];
        self.bus
            .write_read(DS3231_ADDR, &[REG_STATUS], &mut status)
            .map_err(|_| ClockError::Bus)?;
        self.bus
            .write(DS3231_ADDR, &[REG_STATUS, status[0] & !STATUS_OSF])
            .map_err(|_| ClockError::Bus)
    }

    pub fn release(self) -> I2C {
        self.bus
    }
}

impl<I2C: I2c> ClockPort for Ds3231<I2C> {
    fn now(&mut self) -> Result<NaiveDateTime, ClockError> {
        let mut regs = [0u8; 7];
        self.bus
            .write_read(DS3231_ADDR, &[REG_SECONDS], &mut regs)
            .map_err(|_| ClockError::Bus)?;
        decode(&regs).ok_or(ClockError::InvalidDate)
    }

    fn adjust(&mut self, local: NaiveDateTime) -> Result<(), ClockError> {
        let regs = encode(local)?;
        let mut frame = [0u8; 8];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&regs);
        self.bus.write(DS3231_ADDR, &frame).map_err(|_| ClockError::Bus)?;
        if let Err(e) = self.clear_osf() {
            warn!("RTC: time written but OSF not cleared: {}", e);
        }
        Ok(())
    }
}
