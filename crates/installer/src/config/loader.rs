use std::path::Path;

use crate::config::schema::{InstallerConfig, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/installer-config-v1.json");

const MAX_CYCLE_DELAY_MS: u64 = 60_000;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<InstallerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<InstallerConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: InstallerConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the rules the schema cannot express, and guards configs built in
/// code rather than loaded from JSON.
pub fn validate_config(config: &InstallerConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.cycle_delay_ms == 0 || config.cycle_delay_ms > MAX_CYCLE_DELAY_MS {
        return Err(ConfigError::Validation {
            message: format!(
                "cycleDelayMs must be between 1 and {}, got {}",
                MAX_CYCLE_DELAY_MS, config.cycle_delay_ms
            ),
        });
    }

    if config.snapshot_marker.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "snapshotMarker must not be empty".to_string(),
        });
    }

    if config.event_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "eventCapacity must be at least 1".to_string(),
        });
    }

    if let Some(path) = &config.ledger_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "ledgerPath must not be empty".to_string(),
            });
        }
    }

    Ok(())
}
