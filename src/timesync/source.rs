//! Time source descriptors.

/// Response layout of an HTTP time provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpSchema {
    /// worldtimeapi.org: `"datetime"`, ISO 8601 with the zone offset
    /// embedded. Already local.
    WorldTimeApi,
    /// timeapi.io: `"dateTime"`, bare datetime in the requested zone.
    /// Already local.
    TimeApiIo,
    /// worldclockapi.com: `"currentDateTime"`, UTC to the minute
    /// (`YYYY-MM-DDTHH:MMZ`). Needs the UTC offset added.
    WorldClockApi,
}

impl HttpSchema {
    /// Whether a parsed instant is already local wall time.
    pub const fn is_already_local(self) -> bool {
        match self {
            Self::WorldTimeApi | Self::TimeApiIo => true,
            Self::WorldClockApi => false,
        }
    }
}

/// One entry of the failover list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// SNTP server host name.
    Ntp(&'static str),
    /// Plain-HTTP JSON time API.
    Http {
        host: &'static str,
        path: &'static str,
        schema: HttpSchema,
    },
}

impl TimeSource {
    pub const fn is_ntp(&self) -> bool {
        matches!(self, Self::Ntp(_))
    }

    /// Host name, for logs and events.
    pub const fn host(&self) -> &'static str {
        match self {
            Self::Ntp(host) | Self::Http { host, .. } => *host,
        }
    }

    pub const fn protocol(&self) -> &'static str {
        match self {
            Self::Ntp(_) => "ntp",
            Self::Http { .. } => "http",
        }
    }
}
