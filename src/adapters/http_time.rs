//! HTTP transport for the HTTP time providers.
//!
//! Implements [`HttpTransport`] without ever blocking the caller. `begin`
//! hands the GET to a short-lived worker thread; `poll` only looks at the
//! result channel.
//!
//! ```text
//!   main loop                      http-time worker
//!   ─────────                      ────────────────
//!   begin(host, path) ──spawn──▶   EspHttpConnection GET  (≤ timeout)
//!   poll() → Pending                     │
//!   poll() → Pending                     │
//!   poll() → Ready(body) ◀──channel──────┘
//! ```
//!
//! On the device the worker drives `EspHttpConnection` through the
//! `embedded-svc` client. On host builds it answers from a per-host script
//! so the threading and body handling can be tested without a network.

use core::time::Duration;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use embedded_svc::io::Read;
use log::{debug, warn};

use crate::app::ports::{HttpTransport, TransportError, TransportPoll};
use crate::config::HTTP_ATTEMPT_TIMEOUT_MS;

/// Largest body accepted from a provider.
pub const MAX_BODY_BYTES: usize = 2048;
const WORKER_STACK_BYTES: usize = 8 * 1024;

type Exchange = Result<Vec<u8>, TransportError>;

pub struct HttpTimeClient {
    timeout: Duration,
    pending: Option<Receiver<Exchange>>,
    #[cfg(not(target_os = "espidf"))]
    sim: Vec<(String, SimReply)>,
}

/// Scripted answer: status and body, or a transport failure.
#[cfg(not(target_os = "espidf"))]
pub type SimReply = Result<(u16, Vec<u8>), TransportError>;

impl Default for HttpTimeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTimeClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(HTTP_ATTEMPT_TIMEOUT_MS),
            pending: None,
            #[cfg(not(target_os = "espidf"))]
            sim: Vec::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Simulation: what a GET to `host` returns. Unscripted hosts fail DNS.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_reply(&mut self, host: &str, reply: SimReply) {
        self.sim.retain(|(h, _)| h != host);
        self.sim.push((host.to_owned(), reply));
    }

    #[cfg(target_os = "espidf")]
    fn job(&self, host: &str, path: &str) -> impl FnOnce() -> Exchange + Send + 'static {
        let url = format!("http://{host}{path}");
        let timeout = self.timeout;
        move || fetch(&url, timeout)
    }

    #[cfg(not(target_os = "espidf"))]
    fn job(&self, host: &str, path: &str) -> impl FnOnce() -> Exchange + Send + 'static {
        debug!("HTTP(sim): GET http://{}{} (timeout {:?})", host, path, self.timeout);
        let reply = self
            .sim
            .iter()
            .find(|(h, _)| h == host)
            .map_or(Err(TransportError::Dns), |(_, r)| r.clone());
        move || {
            let (status, body) = reply?;
            read_reply(status, &mut body.as_slice())
        }
    }
}

impl HttpTransport for HttpTimeClient {
    fn begin(&mut self, host: &str, path: &str) -> Result<(), TransportError> {
        // A previous worker finishes on its own timeout; its result is dropped.
        self.pending = None;

        let (tx, rx) = mpsc::channel();
        let job = self.job(host, path);

        std::thread::Builder::new()
            .name("http-time".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let _ = tx.send(job());
            })
            .map_err(|e| {
                warn!("HTTP: worker spawn failed: {}", e);
                TransportError::Io
            })?;

        self.pending = Some(rx);
        Ok(())
    }

    fn poll(&mut self) -> TransportPoll<Vec<u8>> {
        let Some(rx) = self.pending.as_ref() else {
            return TransportPoll::Failed(TransportError::NotConnected);
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return TransportPoll::Pending,
            Err(TryRecvError::Disconnected) => Err(TransportError::Io),
        };
        self.pending = None;
        match result {
            Ok(body) => TransportPoll::Ready(body),
            Err(e) => TransportPoll::Failed(e),
        }
    }

    fn cancel(&mut self) {
        self.pending = None;
    }
}

// ───────────────────────────────────────────────────────────────
// Worker side
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn fetch(url: &str, timeout: Duration) -> Exchange {
    use embedded_svc::http::client::Client;
    use embedded_svc::http::{Method, Status};
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

    debug!("HTTP: GET {}", url);
    let conf = Configuration { timeout: Some(timeout), ..Default::default() };
    let conn = EspHttpConnection::new(&conf).map_err(|e| {
        warn!("HTTP: connection setup failed: {:?}", e);
        TransportError::Connect
    })?;
    let mut client = Client::wrap(conn);

    let headers = [("accept", "application/json"), ("user-agent", "fishfeeder")];
    let request = client.request(Method::Get, url, &headers).map_err(|e| {
        warn!("HTTP: request to {} failed: {:?}", url, e);
        TransportError::Connect
    })?;
    let mut response = request.submit().map_err(|e| {
        warn!("HTTP: no response from {}: {:?}", url, e);
        TransportError::Io
    })?;

    let status = response.status();
    read_reply(status, &mut response)
}

/// Collect the body of a 2xx reply, refusing anything over [`MAX_BODY_BYTES`].
fn read_reply<R: Read>(status: u16, body: &mut R) -> Exchange {
    if !(200..300).contains(&status) {
        return Err(TransportError::Status(status));
    }
    let mut out = Vec::with_capacity(512);
    let mut chunk = [0u8; 256];
    loop {
        let n = body.read(&mut chunk).map_err(|_| TransportError::Io)?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() + n > MAX_BODY_BYTES {
            return Err(TransportError::BadResponse);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}
