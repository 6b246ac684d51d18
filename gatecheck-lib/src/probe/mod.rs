//! Pluggable reachability probes, each run once per connected tunnel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

mod dmm;
mod login;
mod session;
mod uma;

pub use dmm::{ApiOutcome, DmmApi, DmmProbe};
pub use login::HttpDmmApi;
pub use session::{CredentialStore, SessionCookies};
pub use uma::UmaProbe;

/// Outcome of one reachability check against one target service.
/// `duration_ms` is present iff the check succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub site: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ProbeResult {
    pub fn reached(site: &'static str, duration_ms: u64) -> Self {
        Self { site, success: true, duration_ms: Some(duration_ms) }
    }

    pub fn unreachable(site: &'static str) -> Self {
        Self { site, success: false, duration_ms: None }
    }
}

/// One reachability check over a named network interface.
#[async_trait]
pub trait Probe: Send {
    fn site(&self) -> &'static str;

    /// Prepare the probe. Returning false aborts the whole run before any
    /// candidate is tested.
    async fn init(&mut self) -> bool;

    /// Issue one check bound to `interface` and classify the outcome.
    /// Never fails the candidate; failures become `success = false`.
    async fn test(&mut self, interface: &str) -> ProbeResult;
}

/// One bounded-timeout HTTP request, optionally bound to an interface.
pub(crate) struct FetchRequest<'a> {
    pub url: &'a str,
    pub method: reqwest::Method,
    pub interface: Option<&'a str>,
    pub cookie: Option<String>,
    pub timeout: Duration,
}

pub(crate) struct Fetched {
    pub status: reqwest::StatusCode,
    pub duration_ms: u64,
    pub body: String,
}

/// Issue the request; any transport failure (including timeout) is `None`.
/// `duration_ms` measures from send to response headers.
pub(crate) async fn fetch(req: FetchRequest<'_>) -> Option<Fetched> {
    let mut builder = reqwest::Client::builder().timeout(req.timeout);
    if let Some(device) = req.interface {
        builder = builder.interface(device);
    }
    let client = match builder.build() {
        Ok(client) => client,
        Err(err) => {
            debug!(%err, "failed to build probe client");
            return None;
        }
    };

    let mut request = client.request(req.method, req.url);
    if let Some(cookie) = &req.cookie {
        request = request.header(reqwest::header::COOKIE, cookie);
    }

    let started = std::time::Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, url = req.url, "probe request failed");
            return None;
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let status = response.status();

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            debug!(%err, url = req.url, "failed to read probe response body");
            return None;
        }
    };

    Some(Fetched { status, duration_ms, body })
}
