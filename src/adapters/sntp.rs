//! SNTP transport.
//!
//! Implements [`NtpTransport`] on top of the ESP-IDF SNTP client in poll
//! mode with immediate sync: `begin` (re)starts the client against one
//! server and `poll` checks the sync status. Once the client reports
//! completion the system clock has been set from the reply, so the UTC
//! seconds are read back from it.
//!
//! On host builds a simulation answers from the host clock after a fixed
//! number of polls, or never when the server is marked unreachable.

use log::debug;

use crate::app::ports::{NtpTransport, TransportError, TransportPoll};

/// SNTP client owning at most one running query.
pub struct SntpTransport {
    #[cfg(target_os = "espidf")]
    client: Option<esp_idf_svc::sntp::EspSntp<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimState,
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    active: bool,
    polls: u32,
    unreachable: heapless::Vec<heapless::String<48>, 8>,
    server: heapless::String<48>,
}

/// Polls before the simulated reply arrives.
#[cfg(not(target_os = "espidf"))]
const SIM_REPLY_AFTER_POLLS: u32 = 2;

impl Default for SntpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SntpTransport {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            sim: SimState::default(),
        }
    }

    /// Simulation: queries to `server` never complete.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_unreachable(&mut self, server: &str) {
        let mut name = heapless::String::new();
        if name.push_str(server).is_ok() {
            let _ = self.sim.unreachable.push(name);
        }
    }
}

#[cfg(target_os = "espidf")]
impl NtpTransport for SntpTransport {
    fn begin(&mut self, server: &str) -> Result<(), TransportError> {
        use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf, SyncMode};

        // Only one SNTP client may exist at a time.
        self.client = None;

        let mut conf: SntpConf<'_> = SntpConf::default();
        conf.servers.fill(server);
        conf.operating_mode = OperatingMode::Poll;
        conf.sync_mode = SyncMode::Immediate;

        let client = EspSntp::new(&conf).map_err(|e| {
            log::warn!("SNTP: start against {} failed: {:?}", server, e);
            TransportError::Connect
        })?;
        debug!("SNTP: query to {} started", server);
        self.client = Some(client);
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll<i64> {
        use esp_idf_svc::sntp::SyncStatus;

        let Some(client) = self.client.as_ref() else {
            return TransportPoll::Failed(TransportError::NotConnected);
        };
        if client.get_sync_status() != SyncStatus::Completed {
            return TransportPoll::Pending;
        }
        self.client = None;
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => TransportPoll::Ready(d.as_secs() as i64),
            Err(_) => TransportPoll::Failed(TransportError::BadResponse),
        }
    }

    fn cancel(&mut self) {
        self.client = None;
    }
}

#[cfg(not(target_os = "espidf"))]
impl NtpTransport for SntpTransport {
    fn begin(&mut self, server: &str) -> Result<(), TransportError> {
        self.sim.server.clear();
        self.sim.server.push_str(server).map_err(|_| TransportError::Dns)?;
        self.sim.active = true;
        self.sim.polls = 0;
        debug!("SNTP(sim): query to {} started", server);
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll<i64> {
        if !self.sim.active {
            return TransportPoll::Failed(TransportError::NotConnected);
        }
        if self.sim.unreachable.iter().any(|s| *s == self.sim.server) {
            return TransportPoll::Pending;
        }
        self.sim.polls += 1;
        if self.sim.polls < SIM_REPLY_AFTER_POLLS {
            return TransportPoll::Pending;
        }
        self.sim.active = false;
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => TransportPoll::Ready(d.as_secs() as i64),
            Err(_) => TransportPoll::Failed(TransportError::BadResponse),
        }
    }

    fn cancel(&mut self) {
        self.sim.active = false;
    }
}
