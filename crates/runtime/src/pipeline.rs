//! Per-route transform pipeline.
//!
//! Transforms run in configured order against an owned copy of the
//! event, each under its own deadline. Failure mode is fail-open by
//! default: the event continues unchanged. A `fail_closed` transform
//! drops the event for this route only; other routes always see the
//! pre-pipeline event.

use std::sync::Arc;
use std::time::Duration;

use relay_core::config::TransformConfig;
use relay_core::event::Event;
use relay_core::record::{LogLevel, LogPhase, LogRecord, LogResult};
use relay_plugin::{TransformContext, TransformOutcome, TransformPlugin};

/// A transform bound to its configuration.
pub struct LoadedTransform {
    pub cfg: TransformConfig,
    pub plugin: Box<dyn TransformPlugin>,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    /// The event survived the chain (possibly modified).
    Continue(Event),
    /// A transform dropped the event, or a fail-closed transform failed.
    Dropped,
}

pub async fn run_pipeline(
    transforms: &[Arc<LoadedTransform>],
    mut event: Event,
    ctx: &TransformContext,
) -> PipelineOutcome {
    for transform in transforms {
        let name = transform.cfg.name.as_str();
        let deadline = Duration::from_millis(transform.cfg.effective_timeout_ms());
        let before = event.clone();

        let call = crate::catch::catch_plugin_panic(name, transform.plugin.execute(event, ctx));
        let result = tokio::time::timeout(deadline, call).await;
        event = match result {
            Ok(Ok(TransformOutcome::Event(mut next))) => {
                // Identity belongs to the envelope, not the transform.
                next.id = before.id.clone();
                next.trace_id = before.trace_id.clone();
                next
            }
            Ok(Ok(TransformOutcome::Drop)) => {
                ctx.sink().record(
                    record(ctx, LogLevel::Info, LogResult::Drop, name, &before, "transform dropped event"),
                );
                return PipelineOutcome::Dropped;
            }
            Ok(Err(e)) => {
                log_failure(ctx, transform, &before, &e.to_string());
                if transform.cfg.fail_closed {
                    return PipelineOutcome::Dropped;
                }
                before
            }
            Err(_elapsed) => {
                log_failure(ctx, transform, &before, "transform timed out");
                if transform.cfg.fail_closed {
                    return PipelineOutcome::Dropped;
                }
                before
            }
        };
    }
    PipelineOutcome::Continue(event)
}

fn log_failure(
    ctx: &TransformContext,
    transform: &LoadedTransform,
    event: &Event,
    error: &str,
) {
    let (result, mode) = if transform.cfg.fail_closed {
        (LogResult::Drop, "fail-closed")
    } else {
        (LogResult::Error, "fail-open")
    };
    ctx.sink().record(
        record(
            ctx,
            LogLevel::Warn,
            result,
            &transform.cfg.name,
            event,
            format!("transform failed ({mode}): {error}"),
        ),
    );
}

fn record(
    ctx: &TransformContext,
    level: LogLevel,
    result: LogResult,
    transform: &str,
    event: &Event,
    message: impl Into<String>,
) -> LogRecord {
    LogRecord::new(level, LogPhase::Transform, ctx.module.clone(), result, message)
        .for_event(event)
        .route(ctx.route.clone())
        .transform(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use relay_core::config::TransformKind;
    use relay_core::event::EventType;
    use relay_plugin::{PluginError, RecordSink};
    use serde_json::json;

    struct Capture(Mutex<Vec<LogRecord>>);

    impl RecordSink for Capture {
        fn record(&self, record: LogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    struct Renaming;

    #[async_trait]
    impl TransformPlugin for Renaming {
        async fn execute(
            &self,
            mut event: Event,
            _ctx: &TransformContext,
        ) -> Result<TransformOutcome, PluginError> {
            event.payload.insert("renamed".to_string(), json!(true));
            // A hostile transform cannot reassign identity.
            event.id = "evt_forged".to_string();
            event.trace_id = Some("trc_forged".to_string());
            Ok(TransformOutcome::Event(event))
        }
    }

    struct Dropping;

    #[async_trait]
    impl TransformPlugin for Dropping {
        async fn execute(&self, _event: Event, _ctx: &TransformContext) -> Result<TransformOutcome, PluginError> {
            Ok(TransformOutcome::Drop)
        }
    }

    struct Failing;

    #[async_trait]
    impl TransformPlugin for Failing {
        async fn execute(&self, _event: Event, _ctx: &TransformContext) -> Result<TransformOutcome, PluginError> {
            Err(PluginError::transient("boom"))
        }
    }

    struct Stalling;

    #[async_trait]
    impl TransformPlugin for Stalling {
        async fn execute(&self, event: Event, _ctx: &TransformContext) -> Result<TransformOutcome, PluginError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(TransformOutcome::Event(event))
        }
    }

    fn loaded(name: &str, plugin: Box<dyn TransformPlugin>, fail_closed: bool) -> Arc<LoadedTransform> {
        loaded_with_timeout(name, plugin, fail_closed, None)
    }

    fn loaded_with_timeout(
        name: &str,
        plugin: Box<dyn TransformPlugin>,
        fail_closed: bool,
        timeout_ms: Option<u64>,
    ) -> Arc<LoadedTransform> {
        Arc::new(LoadedTransform {
            cfg: TransformConfig {
                name: name.to_string(),
                kind: TransformKind::Package,
                plugin: Some(name.to_string()),
                script_path: None,
                config: serde_json::Value::Null,
                timeout_ms,
                fail_closed,
            },
            plugin,
        })
    }

    fn ctx(sink: &Arc<Capture>) -> TransformContext {
        TransformContext::new("m1", "r1", "trc_1", Arc::clone(sink) as Arc<dyn RecordSink>)
    }

    fn event() -> Event {
        Event::new("s1", EventType::ResourceChanged).with_trace_id("trc_1")
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let input = event();
        let outcome = run_pipeline(&[], input.clone(), &ctx(&sink)).await;
        match outcome {
            PipelineOutcome::Continue(out) => assert_eq!(out, input),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transform_modifies_but_identity_is_pinned() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let input = event();
        let chain = vec![loaded("t1", Box::new(Renaming), false)];
        let outcome = run_pipeline(&chain, input.clone(), &ctx(&sink)).await;
        let PipelineOutcome::Continue(out) = outcome else {
            panic!("expected continue");
        };
        assert_eq!(out.payload["renamed"], json!(true));
        assert_eq!(out.id, input.id);
        assert_eq!(out.trace_id, input.trace_id);
    }

    #[tokio::test]
    async fn drop_short_circuits_the_chain() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let chain = vec![
            loaded("t1", Box::new(Dropping), false),
            loaded("t2", Box::new(Renaming), false),
        ];
        let outcome = run_pipeline(&chain, event(), &ctx(&sink)).await;
        assert!(matches!(outcome, PipelineOutcome::Dropped));

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, LogResult::Drop);
        assert_eq!(records[0].transform.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn failure_is_open_by_default() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let input = event();
        let chain = vec![loaded("t1", Box::new(Failing), false)];
        let outcome = run_pipeline(&chain, input.clone(), &ctx(&sink)).await;
        let PipelineOutcome::Continue(out) = outcome else {
            panic!("fail-open must continue");
        };
        assert_eq!(out, input);

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].result, LogResult::Error);
        assert!(records[0].message.contains("fail-open"));
    }

    #[tokio::test]
    async fn fail_closed_drops_the_route() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let chain = vec![loaded("t1", Box::new(Failing), true)];
        let outcome = run_pipeline(&chain, event(), &ctx(&sink)).await;
        assert!(matches!(outcome, PipelineOutcome::Dropped));
        let records = sink.0.lock().unwrap();
        assert!(records[0].message.contains("fail-closed"));
    }

    #[tokio::test]
    async fn timeout_respects_failure_mode() {
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let input = event();
        let chain = vec![loaded_with_timeout("t1", Box::new(Stalling), false, Some(20))];
        let outcome = run_pipeline(&chain, input.clone(), &ctx(&sink)).await;
        let PipelineOutcome::Continue(out) = outcome else {
            panic!("fail-open timeout must continue");
        };
        assert_eq!(out, input);
        assert!(sink.0.lock().unwrap()[0].message.contains("timed out"));
    }
}
