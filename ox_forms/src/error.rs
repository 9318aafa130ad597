use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use crate::expr::ExprError;

/// Failure to load or accept a form configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported configuration format '{0}' (expected json, yaml or yml)")]
    UnsupportedFormat(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A single failed check against a value tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// All failures found while validating a value tree against a step schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error, Serialize)]
#[error("validation failed with {} error(s)", errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// First message reported for `path`, if any.
    pub fn message_for(&self, path: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.message.as_str())
    }
}

/// Failures at the API client boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API configuration: {0}")]
    InvalidSpec(String),
    #[error("request to '{url}' failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to '{url}' returned status {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("another operation is already in progress")]
    Busy,
    #[error("the form session has been disposed")]
    Disposed,
    #[error("step {target} is out of range (form has {count} steps)")]
    StepOutOfRange { target: usize, count: usize },
    #[error(transparent)]
    InvalidConfiguration(#[from] ConfigError),
    #[error("field '{0}' not found")]
    UnknownField(String),
}
