//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements         | Connects to                      |
//! |-------------|--------------------|----------------------------------|
//! | `http_time` | HttpTransport      | EspHttpConnection worker thread  |
//! | `log_sink`  | EventSink          | Serial log output                |
//! | `nvs`       | ConfigPort         | NVS / in-memory store            |
//! |             | StoragePort        |                                  |
//! | `rtc`       | ClockPort          | DS3231 over I²C                  |
//! | `sntp`      | NtpTransport       | ESP-IDF SNTP client              |
//! | `time`      | (uptime source)    | ESP32 high-resolution timer      |
//! | `wifi`      | NetworkPort        | ESP-IDF WiFi STA                 |
//!
//! The stepper and the status LED live in [`crate::drivers`].

pub mod http_time;
pub mod log_sink;
pub mod nvs;
pub mod rtc;
pub mod sntp;
pub mod time;
pub mod wifi;
