use thiserror::Error;

/// Errors that can occur while checking relays.
///
/// Tunnel connection outcomes are not errors; they are data
/// ([`crate::tunnel::TunnelOutcome`]). Everything here is fatal for the
/// current candidate at most, never for the batch.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Relay directory error: {0}")]
    Directory(String),

    #[error("Geolocation lookup failed: {0}")]
    Geo(String),

    #[error("Tunnel config missing {0}")]
    ConfigParse(&'static str),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, GateError>;
