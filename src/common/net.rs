use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProbeUrlError {
    #[error("invalid url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}")]
    Scheme(String),
}

/// Parses the stored endpoint path into the URL handed to the transport.
pub fn parse_probe_url(input: &str) -> Result<Url, ProbeUrlError> {
    let url = Url::parse(input.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProbeUrlError::Scheme(other.to_string())),
    }
}
