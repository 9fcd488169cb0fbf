//! One bounded, pollable query against a single time source.
//!
//! `start` hands the request to the transport and returns at once; the
//! engine then calls `poll` from its task until the reply arrives, the
//! transport gives up, or the per-attempt deadline passes. Nothing here
//! waits.

use log::debug;

use crate::app::ports::{HttpTransport, NtpTransport, TransportError, TransportPoll};
use crate::config::{HTTP_ATTEMPT_TIMEOUT_MS, NTP_ATTEMPT_TIMEOUT_MS, NTP_POLL_INTERVAL_MS};

use super::providers::{self, ParseError, TimeReading};
use super::source::TimeSource;

/// Why an attempt ended without a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptError {
    Transport(TransportError),
    Parse(ParseError),
}

impl core::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Parse(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptPoll {
    Pending,
    Done(TimeReading),
    TimedOut,
    Failed(AttemptError),
}

#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    source: TimeSource,
    deadline_ms: u64,
    next_poll_ms: u64,
    polled: bool,
}

impl Attempt {
    pub fn start(
        source: TimeSource,
        now_ms: u64,
        ntp: &mut dyn NtpTransport,
        http: &mut dyn HttpTransport,
    ) -> Result<Self, TransportError> {
        let timeout_ms = match source {
            TimeSource::Ntp(server) => {
                ntp.begin(server)?;
                NTP_ATTEMPT_TIMEOUT_MS
            }
            TimeSource::Http { host, path, .. } => {
                http.begin(host, path)?;
                HTTP_ATTEMPT_TIMEOUT_MS
            }
        };
        debug!("timesync: {} query to {} started", source.protocol(), source.host());
        Ok(Self { source, deadline_ms: now_ms + timeout_ms, next_poll_ms: now_ms, polled: false })
    }

    pub fn source(&self) -> TimeSource {
        self.source
    }

    /// `false` until the transport has been asked for a reply once.
    pub fn has_polled(&self) -> bool {
        self.polled
    }

    pub fn poll(&mut self, now_ms: u64, ntp: &mut dyn NtpTransport, http: &mut dyn HttpTransport) -> AttemptPoll {
        let result = match self.source {
            TimeSource::Ntp(_) => {
                if now_ms < self.next_poll_ms {
                    TransportPoll::Pending
                } else {
                    self.next_poll_ms = now_ms + NTP_POLL_INTERVAL_MS;
                    self.polled = true;
                    match ntp.poll() {
                        TransportPoll::Ready(secs) => match TimeReading::from_unix_utc(secs) {
                            Some(reading) => TransportPoll::Ready(reading),
                            None => TransportPoll::Failed(TransportError::BadResponse),
                        },
                        TransportPoll::Pending => TransportPoll::Pending,
                        TransportPoll::Failed(e) => TransportPoll::Failed(e),
                    }
                }
            }
            TimeSource::Http { schema, .. } => {
                self.polled = true;
                match http.poll() {
                    TransportPoll::Ready(body) => match providers::parse(schema, &body) {
                        Ok(reading) => TransportPoll::Ready(reading),
                        Err(e) => return AttemptPoll::Failed(AttemptError::Parse(e)),
                    },
                    TransportPoll::Pending => TransportPoll::Pending,
                    TransportPoll::Failed(e) => TransportPoll::Failed(e),
                }
            }
        };

        match result {
            TransportPoll::Ready(reading) => AttemptPoll::Done(reading),
            TransportPoll::Failed(e) => AttemptPoll::Failed(AttemptError::Transport(e)),
            TransportPoll::Pending if now_ms >= self.deadline_ms => AttemptPoll::TimedOut,
            TransportPoll::Pending => AttemptPoll::Pending,
        }
    }

    /// Abandon the exchange on the transport.
    pub fn cancel(&self, ntp: &mut dyn NtpTransport, http: &mut dyn HttpTransport) {
        match self.source {
            TimeSource::Ntp(_) => ntp.cancel(),
            TimeSource::Http { .. } => http.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timesync::source::HttpSchema;

    #[derive(Default)]
    struct Ntp {
        reply: Option<i64>,
        polls: u32,
    }

    impl NtpTransport for Ntp {
        fn begin(&mut self, _server: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn poll(&mut self) -> TransportPoll<i64> {
            self.polls += 1;
            self.reply.map_or(TransportPoll::Pending, TransportPoll::Ready)
        }
        fn cancel(&mut self) {}
    }

    #[derive(Default)]
    struct Http {
        body: Option<Vec<u8>>,
        refuse: bool,
    }

    impl HttpTransport for Http {
        fn begin(&mut self, _host: &str, _path: &str) -> Result<(), TransportError> {
            if self.refuse { Err(TransportError::Dns) } else { Ok(()) }
        }
        fn poll(&mut self) -> TransportPoll<Vec<u8>> {
            self.body.clone().map_or(TransportPoll::Pending, TransportPoll::Ready)
        }
        fn cancel(&mut self) {}
    }

    const WORLDCLOCK: TimeSource = TimeSource::Http {
        host: "worldclockapi.com",
        path: "/api/json/utc/now",
        schema: HttpSchema::WorldClockApi,
    };

    #[test]
    fn ntp_polls_at_fixed_interval_until_deadline() {
        let (mut ntp, mut http) = (Ntp::default(), Http::default());
        let mut a = Attempt::start(TimeSource::Ntp("pool.ntp.org"), 0, &mut ntp, &mut http).unwrap();

        assert_eq!(a.poll(0, &mut ntp, &mut http), AttemptPoll::Pending);
        assert_eq!(a.poll(100, &mut ntp, &mut http), AttemptPoll::Pending);
        assert_eq!(ntp.polls, 1);
        assert_eq!(a.poll(500, &mut ntp, &mut http), AttemptPoll::Pending);
        assert_eq!(ntp.polls, 2);
        assert_eq!(a.poll(10_000, &mut ntp, &mut http), AttemptPoll::TimedOut);
    }

    #[test]
    fn ntp_reply_becomes_utc_reading() {
        let (mut ntp, mut http) = (Ntp { reply: Some(1_705_325_400), polls: 0 }, Http::default());
        let mut a = Attempt::start(TimeSource::Ntp("time.google.com"), 0, &mut ntp, &mut http).unwrap();
        match a.poll(0, &mut ntp, &mut http) {
            AttemptPoll::Done(r) => assert!(!r.is_already_local),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn http_body_is_parsed_with_source_schema() {
        let (mut ntp, mut http) = (Ntp::default(), Http::default());
        let mut a = Attempt::start(WORLDCLOCK, 0, &mut ntp, &mut http).unwrap();
        assert_eq!(a.poll(500, &mut ntp, &mut http), AttemptPoll::Pending);
        http.body = Some(br#"{"currentDateTime":"2024-01-15T13:30Z"}"#.to_vec());
        assert!(matches!(a.poll(1_000, &mut ntp, &mut http), AttemptPoll::Done(_)));
    }

    #[test]
    fn http_garbage_fails_fast() {
        let (mut ntp, mut http) = (Ntp::default(), Http { body: Some(b"nope".to_vec()), refuse: false });
        let mut a = Attempt::start(WORLDCLOCK, 0, &mut ntp, &mut http).unwrap();
        assert_eq!(
            a.poll(0, &mut ntp, &mut http),
            AttemptPoll::Failed(AttemptError::Parse(ParseError::Json))
        );
    }

    #[test]
    fn http_times_out_after_eight_seconds() {
        let (mut ntp, mut http) = (Ntp::default(), Http::default());
        let mut a = Attempt::start(WORLDCLOCK, 1_000, &mut ntp, &mut http).unwrap();
        assert_eq!(a.poll(8_999, &mut ntp, &mut http), AttemptPoll::Pending);
        assert_eq!(a.poll(9_000, &mut ntp, &mut http), AttemptPoll::TimedOut);
    }

    #[test]
    fn refused_start_reports_transport_error() {
        let (mut ntp, mut http) = (Ntp::default(), Http { body: None, refuse: true });
        assert_eq!(
            Attempt::start(WORLDCLOCK, 0, &mut ntp, &mut http).err(),
            Some(TransportError::Dns)
        );
    }
}
