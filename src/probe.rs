use crate::common::time::unix_millis;
use crate::config::EndPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of one probe attempt. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    /// Probe start, Unix epoch milliseconds.
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
    pub status_code: u32,
    pub bytes: u64,
    /// Connect start to body complete, in seconds.
    pub time_elapsed: f64,
}

impl Check {
    pub fn success(ts: SystemTime, status_code: u32, bytes: u64, elapsed: Duration) -> Self {
        Self {
            ts: unix_millis(ts),
            error: None,
            status_code,
            bytes,
            time_elapsed: elapsed.as_secs_f64(),
        }
    }

    /// A failed attempt. `status_code` is kept when a response had already
    /// started arriving; every other numeric field is zero.
    pub fn failure(ts: SystemTime, error: ProbeError, status_code: u32) -> Self {
        Self {
            ts: unix_millis(ts),
            error: Some(error),
            status_code,
            bytes: 0,
            time_elapsed: 0.0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.ts)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    InvalidUrl,
    Dns,
    ConnectRefused,
    ConnectOther,
    Tls,
    Timeout,
    TooManyRedirects,
    BodyRead,
    Io,
}

impl ProbeErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeErrorKind::InvalidUrl => "invalid_url",
            ProbeErrorKind::Dns => "dns",
            ProbeErrorKind::ConnectRefused => "connect_refused",
            ProbeErrorKind::ConnectOther => "connect_other",
            ProbeErrorKind::Tls => "tls",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::TooManyRedirects => "too_many_redirects",
            ProbeErrorKind::BodyRead => "body_read",
            ProbeErrorKind::Io => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeErrorKind::Timeout)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for ProbeError {}

/// Runs one request against an endpoint. Each checker loop owns its prober.
pub trait Prober: Send {
    fn probe(&mut self, endpoint: &EndPoint, timeout: Duration) -> Check;
}

impl<F> Prober for F
where
    F: FnMut(&EndPoint, Duration) -> Check + Send,
{
    fn probe(&mut self, endpoint: &EndPoint, timeout: Duration) -> Check {
        self(endpoint, timeout)
    }
}
