//! Local process actor: spawns a command and feeds it the event.
//!
//! The subprocess boundary is the isolation boundary; a crashing
//! command never affects the runtime. The delivery deadline is enforced
//! by the actor driver, and `kill_on_drop` reaps the child if the call
//! is abandoned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use relay_core::event::Event;
use relay_plugin::{ActorPlugin, Delivery, PluginError};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandActorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment on top of the sanitized base set.
    pub env: HashMap<String, String>,
}

pub struct CommandActor {
    cfg: CommandActorConfig,
}

impl CommandActor {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        let cfg: CommandActorConfig =
            serde_json::from_value(config).map_err(|e| PluginError::validation(e.to_string()))?;
        if cfg.command.is_empty() {
            return Err(PluginError::validation("command actor requires 'command'"));
        }
        Ok(Self { cfg })
    }
}

#[async_trait]
impl ActorPlugin for CommandActor {
    async fn deliver(&self, event: &Event, delivery: &Delivery) -> Result<(), PluginError> {
        let mut command = Command::new(&self.cfg.command);
        command
            .args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();
        // Sanitized base environment: only what a well-behaved child needs.
        for key in ["PATH", "HOME", "LANG", "TMPDIR"] {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command.envs(&self.cfg.env);
        if let Some(cwd) = &self.cfg.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| PluginError::fatal(format!("spawn '{}': {e}", self.cfg.command)))?;

        let input = json!({
            "event": event,
            "with": delivery.with,
            "prompt": delivery.prompt,
        });
        let mut line = serde_json::to_vec(&input)?;
        line.push(b'\n');

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&line)
                .await
                .map_err(|e| PluginError::transient(format!("write stdin: {e}")))?;
            // Dropping closes the pipe so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PluginError::transient(format!("wait: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PluginError::transient(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::event::EventType;

    fn delivery() -> Delivery {
        Delivery {
            route: "r1".to_string(),
            with: serde_json::Map::new(),
            prompt: None,
        }
    }

    #[test]
    fn missing_command_is_validation_error() {
        assert!(CommandActor::from_config(json!({})).is_err());
    }

    #[tokio::test]
    async fn successful_exit_is_delivered() {
        let actor = CommandActor::from_config(json!({ "command": "/bin/cat" })).unwrap();
        let event = Event::new("s1", EventType::ResourceChanged);
        actor.deliver(&event, &delivery()).await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_is_transient() {
        let actor =
            CommandActor::from_config(json!({ "command": "/bin/sh", "args": ["-c", "exit 3"] }))
                .unwrap();
        let event = Event::new("s1", EventType::ResourceChanged);
        let err = actor.deliver(&event, &delivery()).await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_binary_is_fatal() {
        let actor =
            CommandActor::from_config(json!({ "command": "/definitely/not/here" })).unwrap();
        let event = Event::new("s1", EventType::ResourceChanged);
        let err = actor.deliver(&event, &delivery()).await.unwrap_err();
        assert_eq!(err.kind, relay_core::error::ErrorKind::Fatal);
    }
}
