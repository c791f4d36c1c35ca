//! Reference validation for loaded config.
//!
//! The runtime validates only the generic envelope: names, references
//! between routes and their sources/actors/transforms, and structural
//! constraints. Plugin-specific config is validated by each plugin at
//! init.

use std::collections::HashSet;

use crate::error::CoreError;

use super::types::{ModuleConfig, ProjectConfig, TransformKind};

impl ProjectConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(CoreError::Config("state_dir must not be empty".into()));
        }
        if self.bus.dispatch_workers == 0 {
            return Err(CoreError::Config(
                "bus.dispatch_workers must be at least 1".into(),
            ));
        }
        if self.bus.capacity == 0 {
            return Err(CoreError::Config("bus.capacity must be at least 1".into()));
        }

        let mut module_names = HashSet::new();
        let mut source_ids = HashSet::new();
        for module in &self.modules {
            if !module_names.insert(module.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "duplicate module name '{}'",
                    module.name
                )));
            }
            module.validate()?;

            // Source ids are unique process-wide: two modules cannot
            // publish under the same source id.
            for source in &module.sources {
                if !source_ids.insert(source.id.as_str()) {
                    return Err(CoreError::Config(format!(
                        "source id '{}' is owned by more than one module",
                        source.id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ModuleConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        check_ident("module name", &self.name)?;

        let mut sources = HashSet::new();
        for s in &self.sources {
            check_ident("source id", &s.id)?;
            if !sources.insert(s.id.as_str()) {
                return Err(self.err(format!("duplicate source id '{}'", s.id)));
            }
            if !(0.0..=1.0).contains(&s.jitter) {
                return Err(self.err(format!(
                    "source '{}': jitter must be within 0.0..=1.0",
                    s.id
                )));
            }
            if s.poll_interval_ms == 0 {
                return Err(self.err(format!("source '{}': poll_interval_ms must be > 0", s.id)));
            }
        }

        let mut actors = HashSet::new();
        for a in &self.actors {
            check_ident("actor id", &a.id)?;
            if !actors.insert(a.id.as_str()) {
                return Err(self.err(format!("duplicate actor id '{}'", a.id)));
            }
        }

        let mut transforms = HashSet::new();
        for t in &self.transforms {
            check_ident("transform name", &t.name)?;
            if !transforms.insert(t.name.as_str()) {
                return Err(self.err(format!("duplicate transform name '{}'", t.name)));
            }
            match t.kind {
                TransformKind::Package if t.plugin.is_none() => {
                    return Err(self.err(format!(
                        "transform '{}': package kind requires 'plugin'",
                        t.name
                    )));
                }
                TransformKind::Script if t.script_path.is_none() => {
                    return Err(self.err(format!(
                        "transform '{}': script kind requires 'script_path'",
                        t.name
                    )));
                }
                _ => {}
            }
        }

        let mut routes = HashSet::new();
        for r in &self.routes {
            check_ident("route name", &r.name)?;
            if !routes.insert(r.name.as_str()) {
                return Err(self.err(format!("duplicate route name '{}'", r.name)));
            }
            if !sources.contains(r.when.source.as_str()) {
                return Err(self.err(format!(
                    "route '{}': unknown source '{}'",
                    r.name, r.when.source
                )));
            }
            if r.when.events.is_empty() {
                return Err(self.err(format!("route '{}': when.events must not be empty", r.name)));
            }
            if !actors.contains(r.then.actor.as_str()) {
                return Err(self.err(format!(
                    "route '{}': unknown actor '{}'",
                    r.name, r.then.actor
                )));
            }
            for t in &r.transforms {
                if !transforms.contains(t.as_str()) {
                    return Err(self.err(format!(
                        "route '{}': unknown transform '{}'",
                        r.name, t
                    )));
                }
            }
        }

        let mut loggers = HashSet::new();
        for l in &self.loggers {
            check_ident("logger name", &l.name)?;
            if !loggers.insert(l.name.as_str()) {
                return Err(self.err(format!("duplicate logger name '{}'", l.name)));
            }
        }

        Ok(())
    }

    fn err(&self, message: String) -> CoreError {
        CoreError::Config(format!("module '{}': {message}", self.name))
    }
}

/// Names double as file names (checkpoints, logger output) and URL path
/// segments (webhook ingress), so restrict them to a safe charset.
fn check_ident(what: &str, value: &str) -> Result<(), CoreError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !value.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(CoreError::Config(format!("invalid {what}: '{value}'")))
    }
}
