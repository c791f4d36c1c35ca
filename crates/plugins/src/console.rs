//! Console logger: re-emits pipeline records through `tracing`.

use async_trait::async_trait;
use serde_json::Value;

use relay_core::record::{LogLevel, LogRecord};
use relay_plugin::{LoggerPlugin, PluginError};

#[derive(Default)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn from_config(_config: Value) -> Result<Self, PluginError> {
        Ok(Self)
    }
}

#[async_trait]
impl LoggerPlugin for ConsoleLogger {
    async fn log(&self, record: &LogRecord) -> Result<(), PluginError> {
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    target: "relay::pipeline",
                    phase = %record.phase,
                    result = %record.result,
                    module = %record.module,
                    event_id = record.event_id.as_deref().unwrap_or(""),
                    trace_id = record.trace_id.as_deref().unwrap_or(""),
                    route = record.route.as_deref().unwrap_or(""),
                    "{}",
                    record.message
                )
            };
        }
        match record.level {
            LogLevel::Debug => emit!(debug),
            LogLevel::Info => emit!(info),
            LogLevel::Warn => emit!(warn),
            LogLevel::Error => emit!(error),
        }
        Ok(())
    }
}
