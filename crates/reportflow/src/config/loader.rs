use std::path::Path;

use serde_json::Value;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::validation::Contract;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Loads a JSON or YAML config file; the format is picked by extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        load_config_from_yaml_str(&content)
    } else {
        load_config_from_str(&content)
    }
}

/// Loads a config from JSON text.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: Value = serde_json::from_str(content)?;
    load_config_from_value(json_value)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: Value = serde_yaml::from_str(content)?;
    load_config_from_value(json_value)
}

fn load_config_from_value(json_value: Value) -> Result<Config, ConfigError> {
    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &Value) -> Result<(), ConfigError> {
    let contract = Contract::compile("config-v1", SCHEMA_JSON)?;

    contract
        .validate(json_value)
        .map_err(|errors| ConfigError::SchemaValidation {
            errors: errors.join("; "),
        })
}

/// Checks the constraints the schema cannot express, and re-checks the
/// ones that matter for configs built in code.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let pipeline = &config.pipeline;
    if pipeline.fanout_width == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.fanout_width must be at least 1".to_string(),
        });
    }
    if pipeline.run_timeout_secs == 0 || pipeline.call_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline timeouts must be greater than zero".to_string(),
        });
    }
    if pipeline.prompt_version.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "pipeline.prompt_version must not be empty".to_string(),
        });
    }

    for (name, temperature) in config.models.temperatures() {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Validation {
                message: format!("models.{} must be within [0, 2], got {}", name, temperature),
            });
        }
    }

    Ok(())
}
