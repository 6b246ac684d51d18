//! The persistence seam. The relational backend lives outside this
//! repository; the core only needs somewhere to hand records to, plus a
//! read-your-own-writes "checked recently" predicate.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{GateError, Result};
use crate::record::MeasurementRecord;

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// True if a measurement for this relay already exists within the
    /// recency window. Must observe this run's own inserts.
    async fn is_checked_recently(&self, ip: &str) -> bool;

    async fn insert_measurement(&self, record: &MeasurementRecord) -> Result<()>;

    async fn increment_statistic(&self, key: &str, delta: i64) -> Result<()>;
}

/// Appends records as JSON lines for ingestion by the persistence side.
///
/// The recency predicate only covers inserts made by this process; history
/// from earlier runs belongs to the external store.
pub struct JsonlStore {
    path: PathBuf,
    recent_window: TimeDelta,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
    stats: Mutex<HashMap<String, i64>>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>, recent_window: std::time::Duration) -> Self {
        Self {
            path: path.into(),
            recent_window: TimeDelta::from_std(recent_window).unwrap_or(TimeDelta::MAX),
            recent: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub async fn stat(&self, key: &str) -> i64 {
        self.stats.lock().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MeasurementStore for JsonlStore {
    async fn is_checked_recently(&self, ip: &str) -> bool {
        match self.recent.lock().await.get(ip) {
            Some(at) => Utc::now() - *at <= self.recent_window,
            None => false,
        }
    }

    async fn insert_measurement(&self, record: &MeasurementRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| GateError::Store(format!("failed to encode record: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.recent.lock().await.insert(record.server.ip.clone(), Utc::now());
        debug!(ip = %record.server.ip, "measurement recorded");
        Ok(())
    }

    async fn increment_statistic(&self, key: &str, delta: i64) -> Result<()> {
        *self.stats.lock().await.entry(key.to_string()).or_insert(0) += delta;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<MeasurementRecord>>,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
    stats: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_recent(&self, ip: &str) {
        self.recent.lock().await.insert(ip.to_string(), Utc::now());
    }

    pub async fn records(&self) -> Vec<MeasurementRecord> {
        self.records.lock().await.clone()
    }

    pub async fn stat(&self, key: &str) -> i64 {
        self.stats.lock().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn is_checked_recently(&self, ip: &str) -> bool {
        self.recent.lock().await.contains_key(ip)
    }

    async fn insert_measurement(&self, record: &MeasurementRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        self.recent.lock().await.insert(record.server.ip.clone(), Utc::now());
        Ok(())
    }

    async fn increment_statistic(&self, key: &str, delta: i64) -> Result<()> {
        *self.stats.lock().await.entry(key.to_string()).or_insert(0) += delta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeResult;
    use crate::record::{Asn, RelayInfo, TunnelParams};
    use std::time::Duration;

    fn record(ip: &str) -> MeasurementRecord {
        MeasurementRecord {
            server: RelayInfo {
                ip: ip.to_string(),
                country: "JP".to_string(),
                lat: 35.0,
                lon: 139.0,
                speed_mbps: 42.0,
            },
            config: TunnelParams {
                proto: "udp".to_string(),
                port: 1194,
                ca: "CA".to_string(),
                cert: "CERT".to_string(),
                key: "KEY".to_string(),
            },
            asn: Asn { id: "AS64500".to_string(), name: "Example Net".to_string() },
            results: vec![ProbeResult::reached("uma", 120)],
        }
    }

    #[tokio::test]
    async fn insert_is_visible_to_the_recency_predicate() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path().join("out.jsonl"), Duration::from_secs(3600));

        assert!(!store.is_checked_recently("203.0.113.5").await);
        store.insert_measurement(&record("203.0.113.5")).await.unwrap();
        assert!(store.is_checked_recently("203.0.113.5").await);
        assert!(!store.is_checked_recently("203.0.113.6").await);
    }

    #[tokio::test]
    async fn records_append_as_json_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let store = JsonlStore::new(&path, Duration::from_secs(3600));

        store.insert_measurement(&record("203.0.113.5")).await.unwrap();
        store.insert_measurement(&record("203.0.113.6")).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["server"]["ip"], "203.0.113.5");
        assert_eq!(first["config"]["port"], 1194);
        // Probe results keep the success-iff-duration shape.
        assert_eq!(first["results"][0]["duration_ms"], 120);
    }

    #[tokio::test]
    async fn statistics_accumulate() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path().join("out.jsonl"), Duration::from_secs(3600));

        store.increment_statistic("serverTested", 1).await.unwrap();
        store.increment_statistic("serverTested", 2).await.unwrap();
        assert_eq!(store.stat("serverTested").await, 3);
        assert_eq!(store.stat("other").await, 0);
    }

    #[tokio::test]
    async fn zero_window_means_nothing_is_recent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path().join("out.jsonl"), Duration::ZERO);

        store.insert_measurement(&record("203.0.113.5")).await.unwrap();
        // Insert time is strictly in the past by now, outside a zero window.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!store.is_checked_recently("203.0.113.5").await);
    }
}
