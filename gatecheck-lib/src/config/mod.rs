mod loader;
mod root;

pub use loader::load_from_path;
pub use root::{
    BatchConfig, Config, DirectoryConfig, DmmConfig, GeoConfig, LoggingConfig, OutputConfig,
    ProbeConfig, TunnelConfig,
};
