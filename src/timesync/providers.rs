//! Typed parsers for the HTTP time providers.
//!
//! Each provider gets its own body struct and its own datetime format.
//! The result carries an explicit "already local" flag; getting that flag
//! wrong shifts the clock by the zone offset, so it is taken from the
//! [`HttpSchema`], never guessed from the payload.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime};
use serde::Deserialize;

use super::source::HttpSchema;
use crate::config::CLOCK_FRESH_YEAR;

/// A timestamp obtained from a time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReading {
    pub instant: NaiveDateTime,
    pub is_already_local: bool,
}

impl TimeReading {
    /// Seconds since the Unix epoch in UTC, as returned by SNTP. `None`
    /// for instants before [`CLOCK_FRESH_YEAR`].
    pub fn from_unix_utc(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0)
            .map(|d| d.naive_utc())
            .filter(is_plausible)
            .map(|instant| Self { instant, is_already_local: false })
    }

    /// Local wall time, applying `utc_offset_secs` only to UTC readings.
    /// `None` if the shift leaves chrono's range.
    pub fn to_local(self, utc_offset_secs: i32) -> Option<NaiveDateTime> {
        if self.is_already_local {
            Some(self.instant)
        } else {
            self.instant.checked_add_signed(Duration::seconds(i64::from(utc_offset_secs)))
        }
    }
}

/// A source reporting a year before the firmware was built is lying.
fn is_plausible(instant: &NaiveDateTime) -> bool {
    instant.year() >= CLOCK_FRESH_YEAR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Body is not JSON or lacks the expected field.
    Json,
    /// Field present but not in the provider's datetime format.
    Format,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Json => write!(f, "unexpected JSON body"),
            Self::Format => write!(f, "unrecognised datetime format"),
        }
    }
}

#[derive(Deserialize)]
struct WorldTimeApiBody {
    datetime: String,
}

#[derive(Deserialize)]
struct TimeApiIoBody {
    #[serde(rename = "dateTime")]
    date_time: String,
}

#[derive(Deserialize)]
struct WorldClockApiBody {
    #[serde(rename = "currentDateTime")]
    current_date_time: String,
}

/// Parse a response body according to `schema`.
pub fn parse(schema: HttpSchema, body: &[u8]) -> Result<TimeReading, ParseError> {
    let instant = match schema {
        HttpSchema::WorldTimeApi => {
            let b: WorldTimeApiBody = serde_json::from_slice(body).map_err(|_| ParseError::Json)?;
            // "2024-01-15T10:30:45.123456-03:00": wall time in the embedded zone.
            DateTime::parse_from_rfc3339(&b.datetime)
                .map_err(|_| ParseError::Format)?
                .naive_local()
        }
        HttpSchema::TimeApiIo => {
            let b: TimeApiIoBody = serde_json::from_slice(body).map_err(|_| ParseError::Json)?;
            // "2024-01-15T10:30:45.1234567"
            NaiveDateTime::parse_from_str(&b.date_time, "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(|_| ParseError::Format)?
        }
        HttpSchema::WorldClockApi => {
            let b: WorldClockApiBody = serde_json::from_slice(body).map_err(|_| ParseError::Json)?;
            // "2024-01-15T13:30Z"
            NaiveDateTime::parse_from_str(&b.current_date_time, "%Y-%m-%dT%H:%MZ")
                .or_else(|_| NaiveDateTime::parse_from_str(&b.current_date_time, "%Y-%m-%dT%H:%M:%SZ"))
                .map_err(|_| ParseError::Format)?
        }
    };
    if !is_plausible(&instant) {
        return Err(ParseError::Format);
    }
    Ok(TimeReading { instant, is_already_local: schema.is_already_local() })
}
