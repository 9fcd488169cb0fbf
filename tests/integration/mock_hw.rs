//! Mock hardware for integration tests.
//!
//! Every port the service drives has a recording or scripted stand-in
//! here, and [`Bench`] bundles them with a shared uptime so a test can
//! advance the wall clock and the scheduler together. Storage is the real
//! [`NvsAdapter`] running on its in-memory host backend.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use fishfeeder::adapters::nvs::NvsAdapter;
use fishfeeder::app::events::AppEvent;
use fishfeeder::app::ports::{
    ActuatorPort, ClockError, ClockPort, EventSink, HttpTransport, NetworkPort, NtpTransport, StatusIndicator,
    TransportError, TransportPoll,
};
use fishfeeder::app::service::{FeederService, ServicePorts};
use fishfeeder::config::FeederConfig;
use fishfeeder::status::SystemStatus;

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
}

// ── Motor ─────────────────────────────────────────────────────

/// Feed motor that works off `rate` steps per service call.
pub struct MockMotor {
    pub ready: bool,
    pub rate: i32,
    pub remaining: i32,
    pub moves: Vec<i32>,
    pub stops: u32,
}

impl MockMotor {
    pub fn with_rate(rate: i32) -> Self {
        Self { ready: true, rate, remaining: 0, moves: Vec::new(), stops: 0 }
    }

    pub fn broken() -> Self {
        Self { ready: false, ..Self::default() }
    }
}

impl Default for MockMotor {
    fn default() -> Self {
        Self::with_rate(1_024)
    }
}

impl ActuatorPort for MockMotor {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn move_by(&mut self, steps: i32) {
        self.moves.push(steps);
        self.remaining += steps;
    }

    fn is_busy(&self) -> bool {
        self.remaining != 0
    }

    fn stop(&mut self) {
        self.stops += 1;
        self.remaining = 0;
    }

    fn service(&mut self, _now_ms: u64) {
        self.remaining = (self.remaining - self.rate).max(0);
    }
}

// ── Clock ─────────────────────────────────────────────────────

pub struct MockClock {
    pub now: NaiveDateTime,
    pub adjusted: Vec<NaiveDateTime>,
    pub fail_writes: bool,
}

impl MockClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now, adjusted: Vec::new(), fail_writes: false }
    }
}

impl ClockPort for MockClock {
    fn now(&mut self) -> Result<NaiveDateTime, ClockError> {
        Ok(self.now)
    }

    fn adjust(&mut self, local: NaiveDateTime) -> Result<(), ClockError> {
        if self.fail_writes {
            return Err(ClockError::Bus);
        }
        self.adjusted.push(local);
        self.now = local;
        Ok(())
    }
}

// ── Network ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockNetwork {
    pub connected: bool,
    pub power_save: bool,
    /// Every `set_power_save` call, in order.
    pub power_save_log: Vec<bool>,
}

impl NetworkPort for MockNetwork {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn power_save_enabled(&self) -> bool {
        self.power_save
    }

    fn set_power_save(&mut self, enabled: bool) {
        self.power_save = enabled;
        self.power_save_log.push(enabled);
    }
}

// ── Time transports ───────────────────────────────────────────

/// How a scripted server behaves.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    /// Answer on the first poll.
    Answer(T),
    Fail(TransportError),
    /// `begin` itself is refused.
    Refuse(TransportError),
}

/// NTP transport answering from a per-server script. Servers without a
/// script never answer.
#[derive(Default)]
pub struct ScriptedNtp {
    pub script: HashMap<&'static str, Reply<i64>>,
    pub begins: Vec<String>,
    pub cancels: u32,
    current: Option<String>,
}

impl NtpTransport for ScriptedNtp {
    fn begin(&mut self, server: &str) -> Result<(), TransportError> {
        self.begins.push(server.to_string());
        if let Some(Reply::Refuse(e)) = self.script.get(server) {
            return Err(*e);
        }
        self.current = Some(server.to_string());
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll<i64> {
        let Some(server) = self.current.as_deref() else {
            return TransportPoll::Failed(TransportError::Io);
        };
        match self.script.get(server) {
            Some(Reply::Answer(secs)) => TransportPoll::Ready(*secs),
            Some(Reply::Fail(e)) => TransportPoll::Failed(*e),
            _ => TransportPoll::Pending,
        }
    }

    fn cancel(&mut self) {
        self.cancels += 1;
        self.current = None;
    }
}

/// HTTP transport answering from a per-host script.
#[derive(Default)]
pub struct ScriptedHttp {
    pub script: HashMap<&'static str, Reply<Vec<u8>>>,
    /// `(host, path)` of every request.
    pub begins: Vec<(String, String)>,
    current: Option<String>,
}

impl HttpTransport for ScriptedHttp {
    fn begin(&mut self, host: &str, path: &str) -> Result<(), TransportError> {
        self.begins.push((host.to_string(), path.to_string()));
        if let Some(Reply::Refuse(e)) = self.script.get(host) {
            return Err(*e);
        }
        self.current = Some(host.to_string());
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll<Vec<u8>> {
        let Some(host) = self.current.as_deref() else {
            return TransportPoll::Failed(TransportError::Io);
        };
        match self.script.get(host) {
            Some(Reply::Answer(body)) => TransportPoll::Ready(body.clone()),
            Some(Reply::Fail(e)) => TransportPoll::Failed(*e),
            _ => TransportPoll::Pending,
        }
    }

    fn cancel(&mut self) {
        self.current = None;
    }
}

// ── Indicator + sink ──────────────────────────────────────────

#[derive(Default)]
pub struct RecordingIndicator {
    pub shown: Vec<SystemStatus>,
}

impl StatusIndicator for RecordingIndicator {
    fn show(&mut self, status: SystemStatus) {
        self.shown.push(status);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Bench ─────────────────────────────────────────────────────

/// All ports plus the uptime counter.
pub struct Bench {
    pub uptime_ms: u64,
    pub clock: MockClock,
    pub network: MockNetwork,
    pub ntp: ScriptedNtp,
    pub http: ScriptedHttp,
    pub nvs: NvsAdapter,
    pub indicator: RecordingIndicator,
    pub sink: RecordingSink,
}

#[allow(dead_code)]
impl Bench {
    /// Offline bench with the wall clock at `now`.
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            uptime_ms: 0,
            clock: MockClock::new(now),
            network: MockNetwork::default(),
            ntp: ScriptedNtp::default(),
            http: ScriptedHttp::default(),
            nvs: NvsAdapter::default(),
            indicator: RecordingIndicator::default(),
            sink: RecordingSink::default(),
        }
    }

    pub fn ports(&mut self) -> ServicePorts<'_> {
        ServicePorts {
            clock: &mut self.clock,
            network: &mut self.network,
            ntp: &mut self.ntp,
            http: &mut self.http,
            storage: &mut self.nvs,
            indicator: &mut self.indicator,
            sink: &mut self.sink,
        }
    }

    /// Construct and start a service over this bench's storage.
    pub fn boot(&mut self, motor: MockMotor) -> FeederService<MockMotor> {
        self.boot_with(FeederConfig::default(), motor)
    }

    pub fn boot_with(&mut self, config: FeederConfig, motor: MockMotor) -> FeederService<MockMotor> {
        let mut svc = FeederService::new(config, motor, &mut self.nvs);
        svc.start(&mut self.ports());
        svc
    }

    /// One scheduler pass at the current uptime.
    pub fn tick(&mut self, svc: &mut FeederService<MockMotor>) {
        let now_ms = self.uptime_ms;
        svc.tick(now_ms, &mut self.ports());
    }

    /// Advance uptime and wall clock together in `step_ms` increments,
    /// ticking after each step.
    pub fn run_for(&mut self, svc: &mut FeederService<MockMotor>, duration_ms: u64, step_ms: u64) {
        let end = self.uptime_ms + duration_ms;
        while self.uptime_ms < end {
            self.uptime_ms += step_ms;
            self.clock.now += Duration::milliseconds(step_ms as i64);
            self.tick(svc);
        }
    }
}
