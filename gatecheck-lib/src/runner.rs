//! Drives one candidate through connect, probe fan-out and teardown, and
//! the sequential batch loop around it.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::TunnelConfig;
use crate::error::Result;
use crate::geo::GeoResolver;
use crate::ovpn;
use crate::probe::{Probe, ProbeResult};
use crate::record::{Asn, MeasurementRecord, RelayInfo};
use crate::relay::Candidate;
use crate::store::MeasurementStore;
use crate::tunnel::{TunnelOutcome, TunnelSession};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub tested: u64,
    pub skipped: u64,
}

pub struct Orchestrator {
    probes: Vec<Box<dyn Probe>>,
    geo: Box<dyn GeoResolver>,
    tunnel: TunnelConfig,
}

impl Orchestrator {
    pub fn new(
        probes: Vec<Box<dyn Probe>>,
        geo: Box<dyn GeoResolver>,
        tunnel: TunnelConfig,
    ) -> Self {
        Self { probes, geo, tunnel }
    }

    /// Initialize every configured probe. Any failure aborts the run
    /// before the first candidate is touched.
    pub async fn init_probes(&mut self) -> bool {
        for probe in &mut self.probes {
            debug!(site = probe.site(), "initializing probe");
            if !probe.init().await {
                error!(site = probe.site(), "probe failed to initialize");
                return false;
            }
        }
        true
    }

    /// Test one candidate. `Ok(None)` means the tunnel never came up; an
    /// error means the candidate failed after connecting. Either way the
    /// tunnel is torn down exactly once before returning.
    pub async fn test_candidate(
        &mut self,
        candidate: &Candidate,
    ) -> Result<Option<MeasurementRecord>> {
        debug!(ip = %candidate.ip, speed_mbps = candidate.speed_mbps, "testing relay");

        let mut session = TunnelSession::spawn(&candidate.config, &self.tunnel)?;
        let interface = match session.connect().await {
            TunnelOutcome::Connected { interface } => interface,
            outcome => {
                debug!(ip = %candidate.ip, ?outcome, "failed to connect");
                session.teardown().await;
                return Ok(None);
            }
        };
        info!(ip = %candidate.ip, interface, "tunnel up");

        let results = futures::future::join_all(
            self.probes.iter_mut().map(|probe| probe.test(&interface)),
        )
        .await;
        for result in &results {
            match result.duration_ms {
                Some(ms) => debug!(site = result.site, ms, "site reachable"),
                None => debug!(site = result.site, "site unreachable"),
            }
        }

        // Metadata lookup and config extraction can fail; the teardown
        // below must run regardless, so hold the error until after it.
        let record = self.assemble(candidate, results).await;
        session.teardown().await;
        debug!(ip = %candidate.ip, "finished testing relay");

        record.map(Some)
    }

    async fn assemble(
        &self,
        candidate: &Candidate,
        results: Vec<ProbeResult>,
    ) -> Result<MeasurementRecord> {
        let geo = self.geo.lookup(&candidate.ip).await?;
        let params = ovpn::parse_params(&candidate.config)?;

        Ok(MeasurementRecord {
            server: RelayInfo {
                ip: candidate.ip.clone(),
                country: geo.country,
                lat: geo.lat,
                lon: geo.lon,
                speed_mbps: candidate.speed_mbps,
            },
            config: params,
            asn: Asn { id: geo.asn_id, name: geo.asn_name },
            results,
        })
    }

    /// Sequential batch loop: one candidate's full connect, probe,
    /// teardown, persist cycle completes before the next begins, so only
    /// one tunnel process is ever live.
    pub async fn run_batch(
        &mut self,
        candidates: &[Candidate],
        store: &dyn MeasurementStore,
    ) -> BatchStats {
        let mut stats = BatchStats::default();
        info!(count = candidates.len(), "testing relays");

        for candidate in candidates {
            if store.is_checked_recently(&candidate.ip).await {
                debug!(ip = %candidate.ip, "checked recently, skipping");
                stats.skipped += 1;
                continue;
            }

            match self.test_candidate(candidate).await {
                Ok(Some(record)) => {
                    if let Err(err) = store.insert_measurement(&record).await {
                        error!(ip = %candidate.ip, %err, "failed to persist measurement");
                        continue;
                    }
                    if let Err(err) = store.increment_statistic("serverTested", 1).await {
                        error!(ip = %candidate.ip, %err, "failed to update statistics");
                    }
                    stats.tested += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    // Fatal for this candidate only; the batch continues.
                    error!(ip = %candidate.ip, %err, "relay test failed");
                }
            }
        }

        info!(tested = stats.tested, skipped = stats.skipped, "batch finished");
        stats
    }
}

/// Wall clock safety net for the whole batch: force-exits the process once
/// the budget is exceeded. It does not cancel in-flight work.
pub fn spawn_watchdog(limit: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        error!(limit_secs = limit.as_secs(), "wall clock budget exceeded, exiting");
        std::process::exit(1);
    })
}
