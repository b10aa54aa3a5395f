pub mod loader;
pub mod schema;

pub use loader::{
    default_config_path, load_config, load_config_from_str, validate_config, SERVICE_URL_ENV,
};
pub use schema::{
    Config, EndpointPaths, LoggingConfig, PollingConfig, ProcessingConfig, ScannerConfig,
    ServiceConfig,
};
