use std::sync::Arc;

use relay_core::record::{LogLevel, LogPhase, LogRecord, LogResult};

/// Sink for pipeline-phase records; implemented by the runtime's
/// logger manager. Recording is non-blocking.
pub trait RecordSink: Send + Sync {
    fn record(&self, record: LogRecord);
}

/// No-op sink for tests and detached contexts.
pub struct NullSink;

impl RecordSink for NullSink {
    fn record(&self, _record: LogRecord) {}
}

/// Execution context handed to transforms: where the event is in the
/// topology plus a scoped logger.
#[derive(Clone)]
pub struct TransformContext {
    pub module: String,
    pub route: String,
    pub trace_id: String,
    sink: Arc<dyn RecordSink>,
}

impl TransformContext {
    pub fn new(
        module: impl Into<String>,
        route: impl Into<String>,
        trace_id: impl Into<String>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            module: module.into(),
            route: route.into(),
            trace_id: trace_id.into(),
            sink,
        }
    }

    /// Emit a transform-phase record scoped to this module/route/trace.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let mut record = LogRecord::new(
            level,
            LogPhase::Transform,
            self.module.clone(),
            LogResult::Ok,
            message,
        )
        .route(self.route.clone());
        record.trace_id = Some(self.trace_id.clone());
        self.sink.record(record);
    }

    pub fn sink(&self) -> Arc<dyn RecordSink> {
        Arc::clone(&self.sink)
    }
}
