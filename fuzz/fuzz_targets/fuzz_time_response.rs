//! Fuzz target: HTTP time responses
//!
//! Feeds arbitrary bytes through every provider parser. No parser may
//! panic, an accepted reading must carry a plausible year, and converting
//! it to local time must never overflow for a real zone offset.
//!
//! cargo fuzz run fuzz_time_response

#![no_main]

use chrono::Datelike;
use fishfeeder::config::CLOCK_FRESH_YEAR;
use fishfeeder::timesync::providers;
use fishfeeder::timesync::source::HttpSchema;
use libfuzzer_sys::fuzz_target;

const SCHEMAS: [HttpSchema; 3] = [HttpSchema::WorldTimeApi, HttpSchema::TimeApiIo, HttpSchema::WorldClockApi];

fuzz_target!(|data: &[u8]| {
    for schema in SCHEMAS {
        if let Ok(reading) = providers::parse(schema, data) {
            assert_eq!(reading.is_already_local, schema.is_already_local());
            assert!(reading.instant.year() >= CLOCK_FRESH_YEAR);
            for offset in [-12 * 3600, -3 * 3600, 0] {
                assert!(reading.to_local(offset).is_some());
            }
            // Forward shifts near the end of the calendar give None.
            let _ = reading.to_local(14 * 3600);
            let _ = reading.to_local(i32::MAX);
        }
    }
});
