//! Fuzz target: persisted schedule records
//!
//! Plants arbitrary bytes as a stored schedule record (and an arbitrary
//! count sentinel) and loads the table. Loading must never panic, and any
//! table it accepts must contain only valid entries.
//!
//! cargo fuzz run fuzz_schedule_record

#![no_main]

use fishfeeder::adapters::nvs::NvsAdapter;
use fishfeeder::app::ports::StoragePort;
use fishfeeder::config::{MAX_SCHEDULES, NVS_KEY_SCHEDULE_COUNT, NVS_NS_SCHEDULE};
use fishfeeder::schedule::table::load_table;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&count, record)) = data.split_first() else {
        return;
    };
    let mut nvs = NvsAdapter::default();
    let _ = nvs.write(NVS_NS_SCHEDULE, NVS_KEY_SCHEDULE_COUNT, &[count]);
    let _ = nvs.write(NVS_NS_SCHEDULE, "s0", record);

    if let Ok(table) = load_table(&nvs) {
        assert!(table.len() <= MAX_SCHEDULES);
        assert!(table.iter().all(|e| e.validate().is_ok()), "invalid entry accepted");
    }
});
