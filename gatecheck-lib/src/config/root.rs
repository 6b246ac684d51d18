use serde::Deserialize;

/// Main configuration structure
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields a usable configuration. Secrets are never stored here; the
/// config only names the environment variables that hold them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Relay directory (candidate list) settings
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Geolocation/ASN lookup settings
    #[serde(default)]
    pub geo: GeoConfig,
    /// Tunnel process settings
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Batch run settings
    #[serde(default)]
    pub batch: BatchConfig,
    /// Measurement output settings
    #[serde(default)]
    pub output: OutputConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay directory configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    /// URL of the VPN Gate CSV directory
    #[serde(default = "default_directory_url")]
    pub url: String,
    /// Fetch timeout in seconds
    /// Default: 5
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { url: default_directory_url(), timeout_secs: default_directory_timeout() }
    }
}

/// Geolocation lookup configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GeoConfig {
    /// Base URL of the ipinfo-compatible lookup service
    #[serde(default = "default_geo_url")]
    pub url: String,
    /// Environment variable holding the API token
    /// Default: "IPINFO_TOKEN"
    #[serde(default = "default_geo_token_env")]
    pub token_env: String,
    /// Lookup timeout in seconds
    /// Default: 10
    #[serde(default = "default_geo_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            url: default_geo_url(),
            token_env: default_geo_token_env(),
            timeout_secs: default_geo_timeout(),
        }
    }
}

/// Tunnel process configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TunnelConfig {
    /// Path to the OpenVPN binary
    #[serde(default = "default_openvpn")]
    pub openvpn: String,
    /// Run the tunnel binary (and its teardown signal) through sudo
    /// Default: true
    #[serde(default = "default_true")]
    pub sudo: bool,
    /// Time allowed for the tunnel to come up before the candidate is
    /// abandoned, in seconds
    /// Default: 15
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Time to wait for the process to exit after the teardown signal,
    /// in seconds. Exceeding it is logged, never escalated.
    /// Default: 5
    #[serde(default = "default_teardown_grace")]
    pub teardown_grace_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            openvpn: default_openvpn(),
            sudo: true,
            connect_timeout_secs: default_connect_timeout(),
            teardown_grace_secs: default_teardown_grace(),
        }
    }
}

/// Probe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    /// Total per-request timeout in seconds, applied to every probe fetch
    /// Default: 10
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    /// Stateful (DMM) probe settings
    #[serde(default)]
    pub dmm: DmmConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_secs: default_probe_timeout(), dmm: DmmConfig::default() }
    }
}

/// Stateful session probe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DmmConfig {
    /// Where the session cookie pair is persisted between runs
    #[serde(default = "default_session_file")]
    pub session_file: String,
    /// WebDriver endpoint used for the interactive login flow
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// Environment variable holding the account name
    #[serde(default = "default_user_env")]
    pub user_env: String,
    /// Environment variable holding the account password
    #[serde(default = "default_pass_env")]
    pub pass_env: String,
}

impl Default for DmmConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
            webdriver_url: default_webdriver_url(),
            user_env: default_user_env(),
            pass_env: default_pass_env(),
        }
    }
}

/// Batch run configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Wall clock budget for the whole run, in minutes. The watchdog
    /// force-exits the process when exceeded.
    /// Default: 45
    #[serde(default = "default_watchdog")]
    pub watchdog_mins: u64,
    /// Relays measured within this window are skipped, in minutes
    /// Default: 60
    #[serde(default = "default_recent_window")]
    pub recent_window_mins: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { watchdog_mins: default_watchdog(), recent_window_mins: default_recent_window() }
    }
}

/// Measurement output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// File that measurement records are appended to, one JSON object per
    /// line, for ingestion by the persistence side
    #[serde(default = "default_output_path")]
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { path: default_output_path() }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is not set
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Include the module target in log lines
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

fn default_directory_url() -> String {
    "https://www.vpngate.net/api/iphone/".to_string()
}

fn default_directory_timeout() -> u64 {
    5
}

fn default_geo_url() -> String {
    "https://ipinfo.io".to_string()
}

fn default_geo_token_env() -> String {
    "IPINFO_TOKEN".to_string()
}

fn default_geo_timeout() -> u64 {
    10
}

fn default_openvpn() -> String {
    "openvpn".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_teardown_grace() -> u64 {
    5
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_session_file() -> String {
    "session.json".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_user_env() -> String {
    "DMM_USER".to_string()
}

fn default_pass_env() -> String {
    "DMM_PASS".to_string()
}

fn default_watchdog() -> u64 {
    45
}

fn default_recent_window() -> u64 {
    60
}

fn default_output_path() -> String {
    "measurements.jsonl".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
