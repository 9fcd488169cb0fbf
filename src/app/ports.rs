//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ FeederService (domain)
//! ```
//!
//! Driven adapters (RTC, stepper, NVS, WiFi, time transports, status LED)
//! implement these traits. The [`FeederService`](super::service::FeederService)
//! consumes them via generics, so the domain core never touches hardware
//! directly and every engine can be driven from host tests.
//!
//! Nothing behind these traits may block: every network exchange is a
//! `begin` followed by non-blocking `poll` calls from the main loop.

use chrono::NaiveDateTime;

use crate::config::FeederConfig;
use crate::scheduler::{TaskControl, TaskId};
use crate::status::SystemStatus;

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: RTC ↔ domain)
// ───────────────────────────────────────────────────────────────

/// Battery-backed wall clock, in local time.
pub trait ClockPort {
    /// Current local date and time.
    fn now(&mut self) -> Result<NaiveDateTime, ClockError>;

    /// Overwrite the clock with a corrected local time.
    fn adjust(&mut self, local: NaiveDateTime) -> Result<(), ClockError>;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → feed motor)
// ───────────────────────────────────────────────────────────────

/// The feed motor. Only [`FeedingArbiter`](crate::arbiter::FeedingArbiter)
/// holds one.
pub trait ActuatorPort {
    /// `false` when the driver is absent or failed to initialise.
    fn is_ready(&self) -> bool;

    /// Queue a relative move; returns immediately.
    fn move_by(&mut self, steps: i32);

    /// `true` while a move is outstanding.
    fn is_busy(&self) -> bool;

    /// Halt at the current step and drop the remaining move.
    fn stop(&mut self);

    /// Emit whatever steps are due at `now_ms`. Called from the
    /// high-frequency motor task.
    fn service(&mut self, now_ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Status indicator port (driven adapter: domain → LED)
// ───────────────────────────────────────────────────────────────

/// Renders a [`SystemStatus`]. Animation is the adapter's business; the
/// domain only reports changes.
pub trait StatusIndicator {
    fn show(&mut self, status: SystemStatus);
}

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: WiFi station)
// ───────────────────────────────────────────────────────────────

/// Station reachability and radio power-save control.
pub trait NetworkPort {
    fn is_connected(&self) -> bool;

    fn power_save_enabled(&self) -> bool;

    /// Power save makes UDP replies unreliable, so time sync suspends it.
    fn set_power_save(&mut self, enabled: bool);
}

// ───────────────────────────────────────────────────────────────
// Time transports (driven adapters: SNTP, HTTP)
// ───────────────────────────────────────────────────────────────

/// Result of one non-blocking poll of a transport exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPoll<T> {
    /// Still waiting; poll again later.
    Pending,
    /// Exchange finished.
    Ready(T),
    /// Exchange failed and will not complete.
    Failed(TransportError),
}

/// UDP time query against one NTP server.
pub trait NtpTransport {
    /// Start querying `server`, replacing any previous query.
    fn begin(&mut self, server: &str) -> Result<(), TransportError>;

    /// Seconds since the Unix epoch, in UTC, once the reply has arrived.
    fn poll(&mut self) -> TransportPoll<i64>;

    /// Abandon the current query.
    fn cancel(&mut self);
}

/// Plain HTTP GET used by the HTTP time providers.
pub trait HttpTransport {
    /// Start a GET of `http://{host}{path}`, replacing any previous request.
    fn begin(&mut self, host: &str, path: &str) -> Result<(), TransportError>;

    /// Response body once the exchange has completed with a 2xx status.
    fn poll(&mut self) -> TransportPoll<Vec<u8>>;

    fn cancel(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`FeederConfig`].
///
/// Implementations MUST validate before persisting and reject out-of-range
/// values with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort {
    /// Load configuration; [`ConfigError::NotFound`] on first boot.
    fn load(&self) -> Result<FeederConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &FeederConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Durable key-value storage for the schedule table and sync records.
///
/// Keys are namespaced to prevent collisions between subsystems. Writes
/// must complete (or fail) before returning; the ESP-IDF NVS API commits
/// atomically per key.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Read a little-endian `i64` record.
pub fn read_i64(storage: &dyn StoragePort, namespace: &str, key: &str) -> Result<i64, StorageError> {
    let mut buf = [0u8; 8];
    let n = storage.read(namespace, key, &mut buf)?;
    if n != buf.len() {
        return Err(StorageError::Corrupted);
    }
    Ok(i64::from_le_bytes(buf))
}

pub fn write_i64(storage: &mut dyn StoragePort, namespace: &str, key: &str, value: i64) -> Result<(), StorageError> {
    storage.write(namespace, key, &value.to_le_bytes())
}

// ───────────────────────────────────────────────────────────────
// Task delegate (decouples scheduler from the engines)
// ───────────────────────────────────────────────────────────────

/// Callback the [`Scheduler`](crate::scheduler::Scheduler) invokes for
/// each due task. The service implements it with a short-lived context
/// that borrows the engines and hardware ports.
pub trait TaskDelegate {
    /// Run one task body. Must return quickly and never block.
    fn run(&mut self, task: TaskId, now_ms: u64, ctl: &mut TaskControl);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Stored bytes have the wrong size or fail to decode.
    Corrupted,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`ClockPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// Bus transaction with the RTC failed.
    Bus,
    /// RTC registers hold an impossible date.
    InvalidDate,
}

/// Errors from the time transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    /// Host name did not resolve.
    Dns,
    Connect,
    Io,
    /// Non-2xx HTTP status.
    Status(u16),
    /// Reply arrived but was not usable.
    BadResponse,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus => write!(f, "RTC bus error"),
            Self::InvalidDate => write!(f, "RTC holds an invalid date"),
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "network not connected"),
            Self::Dns => write!(f, "DNS lookup failed"),
            Self::Connect => write!(f, "connect failed"),
            Self::Io => write!(f, "socket I/O error"),
            Self::Status(code) => write!(f, "HTTP status {}", code),
            Self::BadResponse => write!(f, "malformed response"),
        }
    }
}
