pub mod actor;
pub mod catch;
pub mod control;
pub mod error;
pub mod ingress;
pub mod logger;
pub mod matcher;
pub mod module;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod script;
pub mod source;

pub use actor::{ActorDriver, DeliverOutcome};
pub use error::RuntimeError;
pub use ingress::WebhookIngress;
pub use logger::LoggerManager;
pub use matcher::match_routes;
pub use module::{ModuleInstance, ModuleRegistry, ModuleState};
pub use pipeline::{run_pipeline, LoadedTransform, PipelineOutcome};
pub use runtime::{ModuleBrief, ModuleStatus, Runtime, RuntimeStatus, SourceStatus};
pub use scheduler::{Scheduler, SourceCommand};
pub use script::ScriptTransform;
pub use source::{HealthStatus, SourceDriver, SourceHealth};
