use std::time::Duration;

use async_trait::async_trait;

use super::{fetch, FetchRequest, Fetched, Probe, ProbeResult};

const SITE: &str = "uma";
const UMA_URL: &str = "https://api-umamusume.cygames.jp/";

/// Stateless HTTP probe. The game API answers plain GETs with 404, so 404
/// is the reachability signal; anything else means the route is no good.
pub struct UmaProbe {
    timeout: Duration,
}

impl UmaProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn classify(fetched: Option<Fetched>) -> ProbeResult {
    match fetched {
        Some(fetched) if fetched.status == reqwest::StatusCode::NOT_FOUND => {
            ProbeResult::reached(SITE, fetched.duration_ms)
        }
        _ => ProbeResult::unreachable(SITE),
    }
}

#[async_trait]
impl Probe for UmaProbe {
    fn site(&self) -> &'static str {
        SITE
    }

    async fn init(&mut self) -> bool {
        true
    }

    async fn test(&mut self, interface: &str) -> ProbeResult {
        let fetched = fetch(FetchRequest {
            url: UMA_URL,
            method: reqwest::Method::GET,
            interface: Some(interface),
            cookie: None,
            timeout: self.timeout,
        })
        .await;

        classify(fetched)
    }
}
