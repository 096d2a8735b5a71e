//! Configuration file loading.
//!
//! Loads the gateway's configuration from a JSON file, with the same
//! security discipline production config loaders apply: a path confined
//! to the working directory, a bounded file size, and full validation
//! before the result is handed to the caller.

use std::fs;
use std::path::Path;

use log::debug;

use crate::config::validation::validate_global_config;
use crate::model::route::{GlobalConfig, TenantConfig};

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Reads and deserializes a configuration file at `path`, rejecting paths
/// that resolve outside the current working directory and files over
/// [`MAX_CONFIG_SIZE`].
fn read_confined_json<T: serde::de::DeserializeOwned>(
    path: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    let candidate = Path::new(path);

    if !candidate.exists() {
        return Err(format!("cannot resolve config path '{path}'").into());
    }

    let canonical = candidate
        .canonicalize()
        .map_err(|e| format!("cannot resolve config path '{path}': {e}"))?;

    let current_dir = std::env::current_dir()
        .map_err(|e| format!("cannot get current directory: {e}"))?;

    if !canonical.starts_with(&current_dir) {
        return Err(format!("config path '{path}' is outside the working directory").into());
    }

    let metadata = fs::metadata(&canonical)
        .map_err(|e| format!("cannot read config file metadata: {e}"))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let data =
        fs::read_to_string(&canonical).map_err(|e| format!("cannot read config file: {e}"))?;

    let parsed: T = serde_json::from_str(&data).map_err(|e| format!("invalid JSON: {e}"))?;
    Ok(parsed)
}

/// Loads the global configuration, honoring `RELAY_CONFIG_PATH` (default
/// `./config.json`), and rejects it outright if validation fails.
pub fn load_global_config() -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    let path =
        std::env::var("RELAY_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("loading configuration from: {path}");
    let config: GlobalConfig = read_confined_json(&path)?;

    let validation = validate_global_config(&config);
    if !validation.is_valid {
        return Err(format!(
            "configuration rejected: {}",
            validation.errors.join("; ")
        )
        .into());
    }

    debug!(
        "loaded configuration with {} backends, {} routes",
        config.backends.len(),
        config.routes.len()
    );
    Ok(config)
}

/// Loads a single tenant overlay file, e.g. `./tenants/<id>.json`.
pub fn load_tenant_config(path: &str) -> Result<TenantConfig, Box<dyn std::error::Error>> {
    read_confined_json(path)
}
