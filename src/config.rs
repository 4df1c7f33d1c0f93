use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub type CheckerId = Uuid;

pub const HTTP_PREFIX: &str = "http://";
pub const HTTPS_PREFIX: &str = "https://";

/// Shortest allowed gap between two ticks of one checker.
pub const MIN_INTERVAL: Duration = Duration::from_secs(2);
/// Longest allowed probe timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint path must contain http:// or https:// (got {path:?})")]
    InvalidPathFormat { path: String },
    #[error("unsupported request method {method:?}")]
    UnsupportedMethod { method: String },
    #[error("interval {interval:?} is below the minimum of {min:?}", min = MIN_INTERVAL)]
    IntervalTooShort { interval: Duration },
    #[error("timeout {timeout:?} is above the maximum of {max:?}", max = MAX_TIMEOUT)]
    TimeoutTooLong { timeout: Duration },
    #[error("timeout {timeout:?} can't be higher than interval {interval:?}")]
    TimeoutExceedsInterval {
        timeout: Duration,
        interval: Duration,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 4] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    /// Verbs are matched exactly; `get` is not `GET`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| ConfigError::UnsupportedMethod {
                method: value.to_string(),
            })
    }
}

/// Validated probe target. Fields are private so a constructed value stays valid.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPoint {
    path: String,
    method: HttpMethod,
    allow_redirects: bool,
}

impl EndPoint {
    /// Accepts any path that contains `http://` or `https://` somewhere in it.
    ///
    /// The scheme check is a substring match, not URL parsing: a path such as
    /// `proxy?to=http://host` is accepted here and only fails later, at probe
    /// time, as an `InvalidUrl` check.
    pub fn new(path: &str, method: &str, allow_redirects: bool) -> Result<Self, ConfigError> {
        if !path.contains(HTTP_PREFIX) && !path.contains(HTTPS_PREFIX) {
            return Err(ConfigError::InvalidPathFormat {
                path: path.to_string(),
            });
        }
        let method = method.parse::<HttpMethod>()?;
        Ok(Self {
            path: path.to_string(),
            method,
            allow_redirects,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn allow_redirects(&self) -> bool {
        self.allow_redirects
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Checks the timeout/interval pair a checker is built with.
pub fn validate_schedule(timeout: Duration, interval: Duration) -> Result<(), ConfigError> {
    if interval < MIN_INTERVAL {
        return Err(ConfigError::IntervalTooShort { interval });
    }
    if timeout > MAX_TIMEOUT {
        return Err(ConfigError::TimeoutTooLong { timeout });
    }
    if timeout > interval {
        return Err(ConfigError::TimeoutExceedsInterval { timeout, interval });
    }
    Ok(())
}
