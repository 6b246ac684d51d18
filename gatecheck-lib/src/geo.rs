//! Geolocation/ASN lookup for a relay address.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::GeoConfig;
use crate::error::{GateError, Result};

/// Geolocation and ASN metadata resolved for one address.
#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub ip: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub asn_id: String,
    pub asn_name: String,
}

/// Resolves geolocation for a relay address. Failures are fatal for the
/// candidate being tested, not for the batch.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoInfo>;
}

/// The shape the lookup service must answer with; anything else fails
/// closed.
#[derive(Debug, Deserialize)]
struct IpInfoBody {
    ip: String,
    country: String,
    loc: String,
    org: String,
}

/// ipinfo.io-backed resolver.
pub struct IpInfoResolver {
    cfg: GeoConfig,
}

impl IpInfoResolver {
    pub fn new(cfg: GeoConfig) -> Self {
        Self { cfg }
    }

    fn token(&self) -> Option<String> {
        std::env::var(&self.cfg.token_env).ok().filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl GeoResolver for IpInfoResolver {
    async fn lookup(&self, ip: &str) -> Result<GeoInfo> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.cfg.timeout_secs))
            .build()
            .map_err(|e| GateError::Geo(format!("failed to build client: {e}")))?;

        let mut request = client.get(format!("{}/{ip}/json", self.cfg.url));
        if let Some(token) = self.token() {
            request = request.query(&[("token", token)]);
        }

        let body: IpInfoBody = request
            .send()
            .await
            .map_err(|e| GateError::Geo(format!("lookup request failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::Geo(format!("unexpected lookup body: {e}")))?;

        let (lat, lon) = split_loc(&body.loc)?;
        let (asn_id, asn_name) = split_org(&body.org)?;
        debug!(ip = %body.ip, country = %body.country, asn_id, "resolved relay location");

        Ok(GeoInfo { ip: body.ip, country: body.country, lat, lon, asn_id, asn_name })
    }
}

/// Split an ipinfo `"lat,lon"` string into floats.
fn split_loc(loc: &str) -> Result<(f64, f64)> {
    let (lat, lon) = loc
        .split_once(',')
        .ok_or_else(|| GateError::Geo(format!("malformed loc: {loc:?}")))?;
    let lat = lat
        .trim()
        .parse()
        .map_err(|_| GateError::Geo(format!("malformed latitude: {lat:?}")))?;
    let lon = lon
        .trim()
        .parse()
        .map_err(|_| GateError::Geo(format!("malformed longitude: {lon:?}")))?;
    Ok((lat, lon))
}

/// Split an ipinfo `"AS12345 Some Carrier"` string into id and name.
fn split_org(org: &str) -> Result<(String, String)> {
    let mut parts = org.split(' ');
    let id = parts
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| GateError::Geo(format!("malformed org: {org:?}")))?;
    let name = parts.collect::<Vec<_>>().join(" ");
    Ok((id.to_string(), name))
}
