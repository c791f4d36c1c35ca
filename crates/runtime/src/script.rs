//! Script transforms: external commands as pipeline stages.
//!
//! The event is written as one JSON line to the child's stdin; on exit
//! 0 a single event JSON is read from its stdout. Exit code 78 means
//! drop; any other non-zero exit is an error. The subprocess boundary
//! is the isolation boundary — a crashing script never affects the
//! runtime, and `kill_on_drop` reaps the child when the pipeline's
//! deadline cancels the call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use relay_core::config::TransformConfig;
use relay_core::event::Event;
use relay_plugin::{PluginError, TransformContext, TransformOutcome, TransformPlugin};

/// Exit status a script uses to drop the event.
const DROP_EXIT_CODE: i32 = 78;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ScriptConfig {
    args: Vec<String>,
    cwd: Option<PathBuf>,
    /// Extra environment on top of the sanitized base set.
    env: HashMap<String, String>,
}

pub struct ScriptTransform {
    path: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ScriptTransform {
    pub fn from_transform_config(cfg: &TransformConfig) -> Result<Self, PluginError> {
        let path = cfg
            .script_path
            .clone()
            .ok_or_else(|| PluginError::validation("script transform requires 'script_path'"))?;
        let script_cfg: ScriptConfig = if cfg.config.is_null() {
            ScriptConfig::default()
        } else {
            serde_json::from_value(cfg.config.clone())
                .map_err(|e| PluginError::validation(e.to_string()))?
        };
        Ok(Self {
            path,
            args: script_cfg.args,
            cwd: script_cfg.cwd,
            env: script_cfg.env,
        })
    }
}

#[async_trait]
impl TransformPlugin for ScriptTransform {
    async fn execute(
        &self,
        event: Event,
        _ctx: &TransformContext,
    ) -> Result<TransformOutcome, PluginError> {
        let mut command = Command::new(&self.path);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();
        for key in ["PATH", "HOME", "LANG", "TMPDIR"] {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| PluginError::fatal(format!("spawn '{}': {e}", self.path.display())))?;

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&line)
                .await
                .map_err(|e| PluginError::transient(format!("write stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PluginError::transient(format!("wait: {e}")))?;

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let first_line = stdout
                    .lines()
                    .next()
                    .ok_or_else(|| PluginError::transient("script wrote no output"))?;
                let event: Event = serde_json::from_str(first_line).map_err(|e| {
                    PluginError::transient(format!("script output is not an event: {e}"))
                })?;
                Ok(TransformOutcome::Event(event))
            }
            Some(DROP_EXIT_CODE) => Ok(TransformOutcome::Drop),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(PluginError::transient(format!(
                    "exit {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
        }
    }
}
