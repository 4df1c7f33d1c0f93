use super::helpers::{elapsed_since_connect, fetch_num_connects, map_curl_error};
use crate::common::net::parse_probe_url;
use crate::config::{EndPoint, HttpMethod};
use crate::probe::{Check, ProbeError, ProbeErrorKind, Prober};
use curl::Error as CurlError;
use curl::easy::{Easy2, Handler, WriteError};
use std::time::{Duration, SystemTime};
use url::Url;

const MAX_REDIRECTS: u32 = 10;

/// Counts body bytes as they arrive off the wire; the payload itself is discarded.
#[derive(Default)]
struct BodyCounter {
    bytes: u64,
}

impl BodyCounter {
    fn reset(&mut self) {
        self.bytes = 0;
    }
}

impl Handler for BodyCounter {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.bytes = self.bytes.saturating_add(data.len() as u64);
        Ok(data.len())
    }
}

/// Single-request HTTP client. Every probe opens a fresh connection and
/// closes it afterwards, so consecutive probes measure the same thing.
pub struct ProbeClient {
    easy: Easy2<BodyCounter>,
}

impl Default for ProbeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeClient {
    pub fn new() -> Self {
        Self {
            easy: Easy2::new(BodyCounter::default()),
        }
    }

    pub fn probe(&mut self, endpoint: &EndPoint, timeout: Duration) -> Check {
        let start_ts = SystemTime::now();
        let url = match parse_probe_url(endpoint.path()) {
            Ok(url) => url,
            Err(err) => {
                return Check::failure(
                    start_ts,
                    ProbeError {
                        kind: ProbeErrorKind::InvalidUrl,
                        message: err.to_string(),
                    },
                    0,
                );
            }
        };

        self.easy.reset();
        self.easy.get_mut().reset();
        if let Err(err) = self.configure(&url, endpoint, timeout) {
            return Check::failure(start_ts, map_curl_error(&err), 0);
        }

        let perform_result = self.easy.perform();
        let status_code = self.easy.response_code().unwrap_or(0);

        if let Err(err) = perform_result {
            // A non-zero status means headers arrived and the body did not.
            let mut error = map_curl_error(&err);
            if status_code > 0 && !error.kind.is_timeout() {
                error.kind = ProbeErrorKind::BodyRead;
            }
            return Check::failure(start_ts, error, status_code);
        }

        let total = self.easy.total_time().unwrap_or_default();
        let namelookup = self.easy.namelookup_time().unwrap_or_default();
        let num_connects = fetch_num_connects(self.easy.raw());
        let elapsed = elapsed_since_connect(total, namelookup, num_connects);

        Check::success(start_ts, status_code, self.easy.get_ref().bytes, elapsed)
    }

    fn configure(
        &mut self,
        url: &Url,
        endpoint: &EndPoint,
        timeout: Duration,
    ) -> Result<(), CurlError> {
        self.easy.url(url.as_str())?;
        // Worker threads; curl must not rely on SIGALRM for DNS timeouts.
        self.easy.signal(false)?;
        self.easy.timeout(timeout)?;
        self.easy.connect_timeout(timeout)?;
        self.easy.fresh_connect(true)?;
        self.easy.forbid_reuse(true)?;
        self.easy.follow_location(endpoint.allow_redirects())?;
        if endpoint.allow_redirects() {
            self.easy.max_redirections(MAX_REDIRECTS)?;
        }

        match endpoint.method() {
            HttpMethod::Get => self.easy.get(true)?,
            HttpMethod::Post => {
                self.easy.post(true)?;
                self.easy.post_field_size(0)?;
            }
            HttpMethod::Put | HttpMethod::Delete => {
                self.easy.custom_request(endpoint.method().as_str())?
            }
        }
        Ok(())
    }
}

impl Prober for ProbeClient {
    fn probe(&mut self, endpoint: &EndPoint, timeout: Duration) -> Check {
        ProbeClient::probe(self, endpoint, timeout)
    }
}
