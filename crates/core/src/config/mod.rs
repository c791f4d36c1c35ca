//! Project configuration: schema, YAML loading, `${VAR}` substitution,
//! and reference validation.
//!
//! Substitution runs over the parsed YAML value before deserialization,
//! so plugin configs and loggers only ever see resolved values.

mod env;
mod loading;
mod types;
mod validation;

pub use env::substitute_env;
pub use types::{
    ActorConfig, BusConfig, BusKind, ControlApiConfig, LoggerConfig, ModuleConfig, OnFull,
    ProjectConfig, RouteConfig, RouteThen, RouteWhen, SourceConfig, TransformConfig,
    TransformKind, WebhookApiConfig,
};
