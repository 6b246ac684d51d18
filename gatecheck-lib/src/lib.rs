#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod ovpn;
pub mod probe;
pub mod record;
pub mod relay;
pub mod runner;
pub mod store;
pub mod tunnel;

pub use cache::{CacheSource, ResultCache, Snapshot};
pub use config::{load_from_path, Config};
pub use error::{GateError, Result};
pub use geo::{GeoInfo, GeoResolver, IpInfoResolver};
pub use probe::{Probe, ProbeResult};
pub use record::{Asn, MeasurementRecord, RelayInfo, TunnelParams};
pub use relay::{fetch_candidates, Candidate};
pub use runner::{spawn_watchdog, BatchStats, Orchestrator};
pub use store::{JsonlStore, MeasurementStore, MemoryStore};
pub use tunnel::{TunnelOutcome, TunnelSession};
