//! The public relay directory: fetching the candidate list and preparing
//! each candidate's tunnel configuration.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use crate::cache::CacheSource;
use crate::config::DirectoryConfig;
use crate::error::{GateError, Result};

/// Column offsets in a directory row. Middle columns (operator, message)
/// may contain commas, so the config blob is taken from the end of the row.
const COL_IP: usize = 1;
const COL_SPEED: usize = 4;
const MIN_COLUMNS: usize = 15;

/// One relay offered for testing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ip: String,
    /// Advertised bandwidth in Mbps.
    pub speed_mbps: f64,
    /// Decoded and rewritten tunnel client configuration.
    pub config: String,
}

/// Fetch and parse the relay directory. Rows that do not parse are
/// skipped; an unreachable or unparsable directory is an error.
pub async fn fetch_candidates(cfg: &DirectoryConfig) -> Result<Vec<Candidate>> {
    debug!(url = %cfg.url, "fetching relay list");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .map_err(|e| GateError::Directory(format!("failed to build client: {e}")))?;

    let text = client
        .get(&cfg.url)
        .send()
        .await
        .map_err(|e| GateError::Directory(format!("directory request failed: {e}")))?
        .text()
        .await
        .map_err(|e| GateError::Directory(format!("failed to read directory body: {e}")))?;

    let candidates = parse_directory(&text);
    if candidates.is_empty() {
        return Err(GateError::Directory("directory contained no usable relays".to_string()));
    }
    debug!(count = candidates.len(), "fetched relay list");
    Ok(candidates)
}

/// Parse the CSV directory body: a `*vpn_servers` banner, a `#`-prefixed
/// header, data rows, and a trailing `*` line. Candidates are sorted
/// ascending by advertised speed.
pub fn parse_directory(text: &str) -> Vec<Candidate> {
    let mut rows: Vec<(String, f64, String)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('*') || line.starts_with('#') {
            continue;
        }

        let columns: Vec<&str> = line.split(',').collect();
        if columns.len() < MIN_COLUMNS {
            debug!(columns = columns.len(), "skipping short directory row");
            continue;
        }

        let ip = columns[COL_IP].to_string();
        let Ok(speed) = columns[COL_SPEED].parse::<f64>() else {
            debug!(ip, "skipping row with unparsable speed");
            continue;
        };
        // Last column so that commas in free-text fields cannot shift it.
        let Some(blob) = columns.last() else { continue };

        let config = match decode_config(blob) {
            Ok(config) => config,
            Err(err) => {
                debug!(ip, %err, "skipping row with undecodable config");
                continue;
            }
        };

        rows.push((ip, speed / 1024.0 / 1024.0, config));
    }

    rows.sort_by(|a, b| a.1.total_cmp(&b.1));
    rows.into_iter()
        .map(|(ip, speed_mbps, config)| Candidate { ip, speed_mbps, config })
        .collect()
}

fn decode_config(blob: &str) -> Result<String> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|e| GateError::Directory(format!("invalid config blob: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| GateError::Directory(format!("config blob is not UTF-8: {e}")))?;
    Ok(rewrite_config(&text))
}

/// Rewrite a decoded tunnel client configuration: drop comment and blank
/// lines, and follow every `cipher` line with a matching `data-ciphers`
/// line so OpenVPN 2.6 clients accept the legacy single-cipher configs.
pub fn rewrite_config(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        out.push(line.to_string());
        if let Some(alg) = line.strip_prefix("cipher ") {
            out.push(format!("data-ciphers {alg}"));
        }
    }

    out.join("\r\n")
}

/// Adapter so the candidate list can sit behind a [`crate::ResultCache`].
pub struct DirectorySource {
    cfg: DirectoryConfig,
}

impl DirectorySource {
    pub fn new(cfg: DirectoryConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl CacheSource<Vec<Candidate>> for DirectorySource {
    async fn refresh(&self) -> Result<Vec<Candidate>> {
        fetch_candidates(&self.cfg).await.inspect_err(|err| {
            warn!(%err, "failed to refresh relay list");
        })
    }
}
