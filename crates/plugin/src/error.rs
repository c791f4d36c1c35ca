use relay_core::error::ErrorKind;
use thiserror::Error;

/// Error returned across the plugin boundary.
///
/// Plugins never kill the runtime: errors bubble up only to the driver
/// that invoked the plugin, which branches on `kind` to decide
/// retry/abandon. There is no policy-by-panic.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PluginError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PluginError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Only transient errors are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        Self::transient(e.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        Self::validation(e.to_string())
    }
}
