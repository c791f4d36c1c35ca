use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::EventType;

// ── Defaults ────────────────────────────────────────────────────────

fn default_graceful_stop_ms() -> u64 {
    10_000
}

fn default_capacity() -> usize {
    1024
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_publish_timeout_ms() -> u64 {
    1_000
}

fn default_max_wal_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_control_bind() -> String {
    "127.0.0.1:0".to_string()
}

fn default_webhook_bind() -> String {
    "127.0.0.1:0".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_poll_timeout_ms() -> u64 {
    30_000
}

fn default_deliver_timeout_ms() -> u64 {
    30_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

const SCRIPT_TIMEOUT_MS: u64 = 5_000;
const PACKAGE_TIMEOUT_MS: u64 = 30_000;

// ── Global sections ─────────────────────────────────────────────────

/// Root of the project configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory for checkpoints, WAL, port/pid files, and logger output.
    pub state_dir: PathBuf,

    #[serde(default = "default_graceful_stop_ms")]
    pub graceful_stop_ms: u64,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub control_api: ControlApiConfig,

    #[serde(default)]
    pub webhook_api: WebhookApiConfig,

    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Memory,
    Wal,
}

/// Backpressure policy when a dispatch queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFull {
    /// Block the publisher until space frees up.
    Block,
    /// Block up to `publish_timeout_ms`, then drop with a warning.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub kind: BusKind,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "BusConfig::default_on_full")]
    pub on_full: OnFull,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Defaults to `<state_dir>/wal` when the WAL kind is selected.
    #[serde(default)]
    pub wal_dir: Option<PathBuf>,
    #[serde(default = "default_max_wal_bytes")]
    pub max_wal_bytes: u64,
}

impl BusConfig {
    fn default_on_full() -> OnFull {
        OnFull::Block
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Memory,
            capacity: default_capacity(),
            on_full: OnFull::Block,
            dispatch_workers: default_dispatch_workers(),
            publish_timeout_ms: default_publish_timeout_ms(),
            wal_dir: None,
            max_wal_bytes: default_max_wal_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlApiConfig {
    /// Loopback bind address; port 0 picks a free port, written to
    /// `<state_dir>/runtime.port`.
    #[serde(default = "default_control_bind")]
    pub bind: String,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            bind: default_control_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookApiConfig {
    #[serde(default = "default_webhook_bind")]
    pub bind: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for WebhookApiConfig {
    fn default() -> Self {
        Self {
            bind: default_webhook_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Module sections ─────────────────────────────────────────────────

/// A named group of sources/actors/transforms/routes/loggers loaded
/// together with a single lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub actors: Vec<ActorConfig>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub loggers: Vec<LoggerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    /// Registry id of the source plugin.
    pub plugin: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bootstrap window hint, merged into the plugin config at module
    /// load. Its meaning on a checkpoint-less first poll is the
    /// plugin's contract.
    #[serde(default)]
    pub initial_lookback_ms: Option<u64>,
    /// Additive random fraction of the interval, `0.0..=1.0`.
    #[serde(default)]
    pub jitter: f64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub id: String,
    pub plugin: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_deliver_timeout_ms")]
    pub deliver_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// Loaded plugin invoked in-process.
    Package,
    /// External command fed event JSON on stdin.
    Script,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub name: String,
    pub kind: TransformKind,
    /// Registry id; required for the package kind.
    #[serde(default)]
    pub plugin: Option<String>,
    /// Command path; required for the script kind.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// When set, a transform failure drops the event for this route
    /// instead of passing it through unchanged.
    #[serde(default)]
    pub fail_closed: bool,
}

impl TransformConfig {
    /// Configured timeout or the kind-specific default.
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(match self.kind {
            TransformKind::Script => SCRIPT_TIMEOUT_MS,
            TransformKind::Package => PACKAGE_TIMEOUT_MS,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub when: RouteWhen,
    #[serde(default)]
    pub transforms: Vec<String>,
    pub then: RouteThen,
    /// Delivery configuration, opaque to the router; handed to the
    /// actor driver (which resolves known sugar such as `prompt_file`).
    #[serde(default)]
    pub with: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteWhen {
    pub source: String,
    pub events: Vec<EventType>,
    /// Dot-path → expected scalar or list of scalars; all entries must
    /// match.
    #[serde(default)]
    pub filter: Option<std::collections::BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteThen {
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub config: Value,
}
