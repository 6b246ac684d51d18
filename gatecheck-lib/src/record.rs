use serde::Serialize;

use crate::probe::ProbeResult;

/// Relay identity plus the geolocation resolved for its address.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    pub ip: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_mbps: f64,
}

/// The fragments of the tunnel configuration needed to reproduce the
/// connection later.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelParams {
    pub proto: String,
    pub port: u16,
    pub ca: String,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Asn {
    pub id: String,
    pub name: String,
}

/// One finished measurement for one relay. Constructed once per connected
/// candidate, handed to the store, then discarded.
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementRecord {
    pub server: RelayInfo,
    pub config: TunnelParams,
    pub asn: Asn,
    pub results: Vec<ProbeResult>,
}
