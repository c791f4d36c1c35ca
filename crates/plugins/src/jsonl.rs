//! JSON-lines file logger.
//!
//! One record per line, appended; the format is owned by this plugin
//! and tooling can tail or post-process the file freely.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use relay_core::record::LogRecord;
use relay_plugin::{LoggerPlugin, PluginError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonlConfig {
    pub path: PathBuf,
}

pub struct JsonlLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlLogger {
    pub fn from_config(config: Value) -> Result<Self, PluginError> {
        let cfg: JsonlConfig =
            serde_json::from_value(config).map_err(|e| PluginError::validation(e.to_string()))?;
        Ok(Self {
            path: cfg.path,
            file: Mutex::new(None),
        })
    }
}

#[async_trait]
impl LoggerPlugin for JsonlLogger {
    async fn init(&self) -> Result<(), PluginError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        *self.file.lock().expect("jsonl lock poisoned") = Some(file);
        Ok(())
    }

    async fn log(&self, record: &LogRecord) -> Result<(), PluginError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().expect("jsonl lock poisoned");
        let file = guard
            .as_mut()
            .ok_or_else(|| PluginError::fatal("jsonl logger used before init"))?;
        file.write_all(&line)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Some(mut file) = self.file.lock().expect("jsonl lock poisoned").take() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::record::{LogLevel, LogPhase, LogResult};
    use serde_json::json;

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.jsonl");
        let logger = JsonlLogger::from_config(json!({ "path": path })).unwrap();
        logger.init().await.unwrap();

        for i in 0..3 {
            let record = LogRecord::new(
                LogLevel::Info,
                LogPhase::Deliver,
                "m1",
                LogResult::Delivered,
                format!("delivery {i}"),
            );
            logger.log(&record).await.unwrap();
        }
        logger.shutdown().await.unwrap();

        let content = fs::read_to_string(dir.path().join("logs/audit.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.module, "m1");
        assert_eq!(parsed.result, LogResult::Delivered);
    }

    #[tokio::test]
    async fn log_before_init_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let logger =
            JsonlLogger::from_config(json!({ "path": dir.path().join("x.jsonl") })).unwrap();
        let record =
            LogRecord::new(LogLevel::Info, LogPhase::Bus, "m1", LogResult::Ok, "queued");
        assert!(logger.log(&record).await.is_err());
    }

    #[test]
    fn missing_path_is_validation_error() {
        assert!(JsonlLogger::from_config(json!({})).is_err());
    }
}
