// Error types for settings management

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Setting not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid boolean for `{key}`: {value:?} (expected true or false)")]
    InvalidBoolean { key: String, value: String },

    #[error("Invalid value for `{key}`: expected {expected}, got {value}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid object reference {0:?}")]
    InvalidReference(String),

    #[error("Failed to load settings: {0}")]
    LoadError(String),

    #[error("Failed to parse settings (line {line}): {message}")]
    ParseError { line: usize, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    /// Build an [`ConfigError::InvalidValue`] from any displayable value
    pub fn invalid(key: &str, expected: &'static str, value: impl std::fmt::Display) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            expected,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
