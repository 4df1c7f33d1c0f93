mod client;
mod helpers;

pub use client::ProbeClient;

use crate::probe::Prober;

/// Builds one prober per scheduling loop.
pub type ProberFactory = std::sync::Arc<dyn Fn() -> Box<dyn Prober> + Send + Sync>;

/// Factory handing out curl-backed clients.
pub fn curl_prober_factory() -> ProberFactory {
    std::sync::Arc::new(|| Box::new(ProbeClient::new()) as Box<dyn Prober>)
}
