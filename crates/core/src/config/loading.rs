use std::path::Path;

use tracing::info;

use crate::error::CoreError;

use super::env::substitute_env;
use super::types::ProjectConfig;

impl ProjectConfig {
    /// Parse config from a YAML string: substitute `${VAR}` references,
    /// deserialize, validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        substitute_env(&mut value)?;
        let config: Self = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        info!(path = %path.display(), modules = config.modules.len(), "loaded project config");
        Ok(config)
    }
}
