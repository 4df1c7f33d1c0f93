use crate::probe::{ProbeError, ProbeErrorKind};
use curl::Error as CurlError;
use std::time::Duration;

// CURLINFO constants not exposed by curl-sys
// See: https://curl.se/libcurl/c/CURLINFO_NUM_CONNECTS.html
const CURLINFO_LONG: curl_sys::CURLINFO = 0x200000;
const CURLINFO_NUM_CONNECTS: curl_sys::CURLINFO = CURLINFO_LONG + 26;

pub(super) fn map_curl_error(err: &CurlError) -> ProbeError {
    let message = err.to_string();

    let kind = if err.is_couldnt_resolve_host() || err.is_couldnt_resolve_proxy() {
        ProbeErrorKind::Dns
    } else if err.is_operation_timedout() {
        ProbeErrorKind::Timeout
    } else if err.is_couldnt_connect() {
        if message.to_ascii_lowercase().contains("refused") {
            ProbeErrorKind::ConnectRefused
        } else {
            ProbeErrorKind::ConnectOther
        }
    } else if err.is_ssl_connect_error()
        || err.is_ssl_cacert()
        || err.is_ssl_certproblem()
        || err.is_ssl_cipher()
        || err.is_peer_failed_verification()
    {
        ProbeErrorKind::Tls
    } else if err.is_too_many_redirects() {
        ProbeErrorKind::TooManyRedirects
    } else if err.is_url_malformed() || err.is_unsupported_protocol() {
        ProbeErrorKind::InvalidUrl
    } else if err.is_recv_error() || err.is_partial_file() || err.is_read_error() {
        ProbeErrorKind::BodyRead
    } else {
        ProbeErrorKind::Io
    };

    ProbeError { kind, message }
}

/// Latency from connection start to the last body byte.
///
/// curl reports every timer relative to the start of the transfer, and the
/// connect phase begins once name lookup is done. A transfer that opened no
/// connection of its own has no connect phase, so the whole transfer time is
/// reported instead.
pub(super) fn elapsed_since_connect(
    total: Duration,
    namelookup: Duration,
    num_connects: Option<i64>,
) -> Duration {
    match num_connects {
        Some(n) if n > 0 => saturating_sub(total, namelookup),
        _ => total,
    }
}

pub(super) fn saturating_sub(left: Duration, right: Duration) -> Duration {
    left.checked_sub(right).unwrap_or(Duration::from_millis(0))
}

pub(super) fn fetch_num_connects(handle: *mut curl_sys::CURL) -> Option<i64> {
    if handle.is_null() {
        return None;
    }

    unsafe {
        let mut count: std::os::raw::c_long = 0;
        let rc = curl_sys::curl_easy_getinfo(
            handle,
            CURLINFO_NUM_CONNECTS,
            &mut count as *mut std::os::raw::c_long,
        );

        if rc != curl_sys::CURLE_OK {
            return None;
        }

        Some(count as i64)
    }
}
