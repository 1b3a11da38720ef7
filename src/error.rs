//! Error types for ragstack

use std::path::PathBuf;
use thiserror::Error;

/// Result type for ragstack operations
pub type Result<T> = std::result::Result<T, StackError>;

/// ragstack error types
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Compose file not found in {0}")]
    ComposeFileNotFound(PathBuf),

    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Env file parse error in {path} at line {line}: {message}")]
    EnvFileParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Env file not found: {0}")]
    EnvFileNotFound(PathBuf),

    #[error("Required variables are not set: {}", .0.join(", "))]
    UndefinedVariables(Vec<String>),

    #[error("Required variable {name} is missing a value: {message}")]
    RequiredVariable { name: String, message: String },

    #[error("Invalid interpolation format: {0}")]
    InvalidInterpolation(String),

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Invalid volume specification: {0}")]
    InvalidVolume(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid restart policy: {0}")]
    InvalidRestartPolicy(String),

    #[error("Invalid healthcheck: {0}")]
    InvalidHealthcheck(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("No service declares profile: {0}")]
    UnknownProfile(String),

    #[error("Descriptor failed validation with {} error(s):\n{}", .0.len(), .0.join("\n"))]
    Validation(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_yaml::Error> for StackError {
    fn from(e: serde_yaml::Error) -> Self {
        StackError::Yaml(e.to_string())
    }
}
