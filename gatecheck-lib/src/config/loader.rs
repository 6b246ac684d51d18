use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{GateError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GateError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| GateError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.directory.url.is_empty() {
        return Err(GateError::Config("directory.url must not be empty".to_string()));
    }
    if cfg.geo.url.is_empty() {
        return Err(GateError::Config("geo.url must not be empty".to_string()));
    }
    if cfg.tunnel.openvpn.is_empty() {
        return Err(GateError::Config("tunnel.openvpn must not be empty".to_string()));
    }
    if cfg.tunnel.connect_timeout_secs == 0 {
        return Err(GateError::Config("tunnel.connect_timeout_secs must be nonzero".to_string()));
    }
    if cfg.probe.timeout_secs == 0 {
        return Err(GateError::Config("probe.timeout_secs must be nonzero".to_string()));
    }
    if cfg.batch.watchdog_mins == 0 {
        return Err(GateError::Config("batch.watchdog_mins must be nonzero".to_string()));
    }

    Ok(())
}
