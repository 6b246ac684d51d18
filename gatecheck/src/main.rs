#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gatecheck_lib::config::{Config, LoggingConfig};
use gatecheck_lib::probe::{CredentialStore, DmmProbe, HttpDmmApi, Probe, UmaProbe};
use gatecheck_lib::runner::spawn_watchdog;
use gatecheck_lib::{fetch_candidates, load_from_path, IpInfoResolver, JsonlStore, Orchestrator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "VPN Gate relay reachability checker")]
struct Cli {
    /// Path to configuration TOML file; defaults apply when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => match load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("failed to load configuration: {err}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    init_tracing(&cfg.logging);

    let probe_timeout = Duration::from_secs(cfg.probe.timeout_secs);
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(UmaProbe::new(probe_timeout)),
        Box::new(DmmProbe::new(
            Box::new(HttpDmmApi::new(probe_timeout, cfg.probe.dmm.clone())),
            CredentialStore::new(&cfg.probe.dmm.session_file),
        )),
    ];

    let mut orchestrator = Orchestrator::new(
        probes,
        Box::new(IpInfoResolver::new(cfg.geo.clone())),
        cfg.tunnel.clone(),
    );

    info!("initializing probes");
    if !orchestrator.init_probes().await {
        error!("probe initialization failed");
        std::process::exit(1);
    }

    spawn_watchdog(Duration::from_secs(cfg.batch.watchdog_mins * 60));

    info!("updating relay list");
    let candidates = match fetch_candidates(&cfg.directory).await {
        Ok(candidates) => candidates,
        Err(err) => {
            error!(%err, "failed to fetch relay list");
            std::process::exit(1);
        }
    };

    let store = JsonlStore::new(
        &cfg.output.path,
        Duration::from_secs(cfg.batch.recent_window_mins * 60),
    );
    let stats = orchestrator.run_batch(&candidates, &store).await;
    info!(tested = stats.tested, skipped = stats.skipped, "run complete");
}

fn init_tracing(cfg: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(cfg.show_target)
        .init();
}
