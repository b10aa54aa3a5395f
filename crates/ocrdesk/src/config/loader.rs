use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable that overrides `service.base_url`.
pub const SERVICE_URL_ENV: &str = "OCRDESK_SERVICE_URL";

const SUPPORTED_VERSION: &str = "1.0";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// `<platform config dir>/ocrdesk/config.json`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ocrdesk").join("config.json"))
}

impl Config {
    /// Loads the default config file, falling back to built-in defaults when it is absent.
    pub fn load_or_default() -> Result<Config, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => load_config(path),
            _ => {
                let mut config = Config::default();
                apply_env_overrides(&mut config);
                validate_config(&config)?;
                Ok(config)
            }
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var(SERVICE_URL_ENV) {
        if !url.trim().is_empty() {
            log::debug!("Using service URL from {}", SERVICE_URL_ENV);
            config.service.base_url = url.trim().to_string();
        }
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let base_url = config.service.base_url.as_str();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("service.base_url must be an http(s) URL, got '{}'", base_url),
        });
    }

    if !config
        .service
        .endpoints
        .job_status
        .split('/')
        .any(|segment| segment == "{id}")
    {
        return Err(ConfigError::Validation {
            message: "service.endpoints.job_status must contain an '{id}' path segment"
                .to_string(),
        });
    }

    let polling = &config.polling;
    if polling.interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "polling.interval_ms must be greater than 0".to_string(),
        });
    }
    if polling.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            message: "polling.fetch_timeout_ms must be greater than 0".to_string(),
        });
    }
    if polling.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation {
            message: "polling.max_consecutive_failures must be at least 1".to_string(),
        });
    }

    let scanner = &config.scanner;
    if scanner.progress_step == 0 {
        return Err(ConfigError::Validation {
            message: "scanner.progress_step must be at least 1".to_string(),
        });
    }
    if scanner.progress_ceiling >= 100 {
        return Err(ConfigError::Validation {
            message: "scanner.progress_ceiling must be below 100".to_string(),
        });
    }
    if scanner.progress_tick_ms == 0 {
        return Err(ConfigError::Validation {
            message: "scanner.progress_tick_ms must be greater than 0".to_string(),
        });
    }

    Ok(())
}
