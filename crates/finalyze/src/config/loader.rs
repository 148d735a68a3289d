use std::path::Path;

use crate::config::schema::{Config, RetryConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Hard ceiling for a history page, whatever the config says.
pub const HISTORY_LIMIT_CEILING: u32 = 100;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

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

/// Checks the cross-field rules a schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.max_upload_bytes == 0 {
        return invalid("max_upload_bytes must be at least 1".to_string());
    }

    let worker = &config.worker;
    if worker.worker_count == 0 {
        return invalid("worker.worker_count must be at least 1".to_string());
    }
    if worker.poll_interval_ms == 0 {
        return invalid("worker.poll_interval_ms must be at least 1".to_string());
    }
    if worker.heartbeat_interval_secs == 0 {
        return invalid("worker.heartbeat_interval_secs must be at least 1".to_string());
    }
    if worker.heartbeat_interval_secs >= worker.visibility_timeout_secs {
        return invalid(format!(
            "worker.heartbeat_interval_secs ({}) must be below worker.visibility_timeout_secs ({})",
            worker.heartbeat_interval_secs, worker.visibility_timeout_secs
        ));
    }
    if worker.analysis_time_limit_secs == 0 {
        return invalid("worker.analysis_time_limit_secs must be at least 1".to_string());
    }

    validate_retry("store_retry", &config.store_retry)?;
    validate_retry("enqueue_retry", &config.enqueue_retry)?;

    let history = &config.history;
    if history.default_limit == 0
        || history.default_limit > history.max_limit
        || history.max_limit > HISTORY_LIMIT_CEILING
    {
        return invalid(format!(
            "history limits must satisfy 1 <= default_limit ({}) <= max_limit ({}) <= {}",
            history.default_limit, history.max_limit, HISTORY_LIMIT_CEILING
        ));
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return invalid(format!(
            "logging.level must be one of {}, got '{}'",
            LOG_LEVELS.join("|"),
            config.logging.level
        ));
    }

    if let Some(ref command) = config.analyzer.command {
        if command.trim().is_empty() {
            return invalid("analyzer.command must not be blank".to_string());
        }
    }

    Ok(())
}

fn validate_retry(name: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: format!("{}.max_attempts must be at least 1", name),
        });
    }
    Ok(())
}
