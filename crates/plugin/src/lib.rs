pub mod context;
pub mod error;
pub mod registry;
pub mod traits;

pub use context::{NullSink, RecordSink, TransformContext};
pub use error::PluginError;
pub use registry::{
    ActorRegistration, LoggerRegistration, PluginRegistry, SetupMetadata, SourceRegistration,
    TransformRegistration,
};
pub use traits::{
    ActorPlugin, Delivery, LoggerPlugin, PollOutcome, PushHandler, PushRequest, PushResponse,
    SourcePlugin, TransformOutcome, TransformPlugin,
};
