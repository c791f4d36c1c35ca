pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod record;

pub use checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore};
pub use config::{
    ActorConfig, BusConfig, BusKind, ControlApiConfig, LoggerConfig, ModuleConfig, OnFull,
    ProjectConfig, RouteConfig, RouteThen, RouteWhen, SourceConfig, TransformConfig,
    TransformKind, WebhookApiConfig,
};
pub use error::{CoreError, ErrorKind};
pub use event::{new_event_id, new_trace_id, Event, EventType};
pub use record::{LogLevel, LogPhase, LogRecord, LogResult};
