use std::path::PathBuf;
use thiserror::Error;

use crate::audit::AuditError;
use crate::pipeline::{PipelineError, RunFailure};
use crate::telemetry::TelemetryError;
use crate::validation::ContractError;

#[derive(Error, Debug)]
pub enum ReportflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Run(#[from] RunFailure),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Embedded config schema is unusable: {0}")]
    Schema(#[from] ContractError),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, ReportflowError>;
