use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error classification used at the plugin boundary.
///
/// Drivers branch on the kind to decide retry/abandon policy; no panic
/// handling is used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Worth retrying later (I/O hiccup, timeout, backpressure).
    Transient,
    /// Not retriable; the component stays scheduled but is unhealthy.
    Fatal,
    /// Terminal for this delivery; the recipient refused it.
    Rejected,
    /// Bad input or configuration.
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Errors produced by the core data/config/checkpoint layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("unresolved env var reference: {0}")]
    UnresolvedEnv(String),

    #[error("checkpoint error for source '{source_id}': {message}")]
    Checkpoint { source_id: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
