use thiserror::Error;

use crate::module::ModuleState;

/// Errors surfaced by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] relay_core::error::CoreError),

    #[error(transparent)]
    Bus(#[from] relay_bus::BusError),

    #[error(transparent)]
    Plugin(#[from] relay_plugin::PluginError),

    #[error("module '{0}' not found")]
    ModuleNotFound(String),

    #[error("module '{0}' is already loaded")]
    DuplicateModule(String),

    #[error("source id '{source_id}' is already owned by module '{module}'")]
    DuplicateSource { source_id: String, module: String },

    #[error("module '{module}': illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        module: String,
        from: ModuleState,
        to: ModuleState,
    },

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
